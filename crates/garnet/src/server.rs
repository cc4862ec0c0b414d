//
// server.rs
//
// Task layout: transport reader, primary message loop, outbound writer
//

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::cancellation::{cancel_target, CancellationRegistry};
use crate::message::{Message, Outbox};
use crate::method::Method;
use crate::router::{Router, RouterOptions};
use crate::transport::{read_message, write_message};

/// How long the writer may take to flush after the loop ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn start_lsp() -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve(stdin, stdout, RouterOptions::default()).await
}

/// Serve one session over the given streams until `exit` or end of input.
pub async fn serve<R, W>(reader: R, writer: W, options: RouterOptions) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let cancellation = CancellationRegistry::new();

    let writer_task = tokio::spawn(write_loop(writer, outbound_rx));
    let reader_task = tokio::spawn(read_loop(reader, inbound_tx, cancellation.clone()));

    let router = Router::new(Outbox::new(outbound_tx), cancellation, options);
    let runtime = tokio::runtime::Handle::current();
    let router = tokio::task::spawn_blocking(move || {
        // Indexing spawns onto the runtime from inside the loop
        let _enter = runtime.enter();
        primary_loop(router, inbound_rx)
    })
    .await?;

    reader_task.abort();
    router.shutdown_token().cancel();
    let indexer = router.indexer().clone();
    drop(router);
    indexer.join().await;
    drop(indexer);

    if tokio::time::timeout(DRAIN_TIMEOUT, writer_task).await.is_err() {
        log::warn!("Outbound queue did not drain before exit");
    }
    log::info!("Session ended");
    Ok(())
}

/// Runs every message to completion in arrival order.
fn primary_loop(mut router: Router, mut inbound: UnboundedReceiver<Message>) -> Router {
    while let Some(message) = inbound.blocking_recv() {
        router.process(message);
        if router.exit_requested() {
            break;
        }
    }
    router
}

async fn read_loop<R>(mut reader: R, inbound: UnboundedSender<Message>, cancellation: CancellationRegistry)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let value = match read_message(&mut reader).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                log::info!("Client closed the input stream");
                break;
            }
            Err(err) => {
                log::error!("Failed to read message: {:#}", err);
                break;
            }
        };
        let message = match Message::from_value(value) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("Dropping malformed message: {}", err);
                continue;
            }
        };

        match &message {
            // Applied here so a cancel can overtake the queued request
            Message::Notification { method, params } if Method::from_name(method) == Method::CancelRequest => {
                if let Some(id) = cancel_target(params) {
                    cancellation.cancel(id);
                }
                continue;
            }
            Message::Request { id, .. } => cancellation.register(id.clone()),
            _ => {}
        }

        if inbound.send(message).is_err() {
            break;
        }
    }
}

async fn write_loop<W>(mut writer: W, mut outbound: UnboundedReceiver<Message>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        if let Err(err) = write_message(&mut writer, &message.to_value()).await {
            log::error!("Failed to write message: {:#}", err);
            break;
        }
    }
}
