//
// transport.rs
//
// Content-Length framed JSON-RPC over async byte streams
//

use anyhow::{anyhow, Context};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one framed message. Returns `Ok(None)` at end of stream.
pub async fn read_message<R>(reader: &mut R) -> anyhow::Result<Option<Value>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            if content_length.is_none() {
                return Ok(None);
            }
            return Err(anyhow!("stream ended inside a message header"));
        }
        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            if content_length.is_some() {
                break;
            }
            // Stray blank line between messages
            continue;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                let length = value
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("invalid Content-Length '{}'", value.trim()))?;
                content_length = Some(length);
            }
        }
    }

    let length = content_length.unwrap_or_default();
    let mut body = vec![0u8; length];
    reader
        .read_exact(&mut body)
        .await
        .context("stream ended inside a message body")?;
    let value = serde_json::from_slice(&body).context("message body is not JSON")?;
    Ok(Some(value))
}

pub async fn write_message<W>(writer: &mut W, value: &Value) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}
