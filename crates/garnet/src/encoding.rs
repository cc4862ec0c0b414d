//
// encoding.rs
//
// Position encodings negotiated with the client
//

use tower_lsp::lsp_types::{ClientCapabilities, PositionEncodingKind};

/// Unit in which `Position.character` counts columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionEncoding {
    Utf8,
    #[default]
    Utf16,
    Utf32,
}

impl PositionEncoding {
    /// Pick the first of utf-8, utf-16, utf-32 the client lists. Clients that
    /// list nothing only understand utf-16.
    pub fn negotiate(capabilities: &ClientCapabilities) -> Self {
        let offered = capabilities
            .general
            .as_ref()
            .and_then(|general| general.position_encodings.as_deref())
            .unwrap_or(&[]);

        [
            (PositionEncodingKind::UTF8, PositionEncoding::Utf8),
            (PositionEncodingKind::UTF16, PositionEncoding::Utf16),
            (PositionEncodingKind::UTF32, PositionEncoding::Utf32),
        ]
        .into_iter()
        .find(|(kind, _)| offered.contains(kind))
        .map(|(_, encoding)| encoding)
        .unwrap_or_default()
    }

    pub fn kind(self) -> PositionEncodingKind {
        match self {
            PositionEncoding::Utf8 => PositionEncodingKind::UTF8,
            PositionEncoding::Utf16 => PositionEncodingKind::UTF16,
            PositionEncoding::Utf32 => PositionEncodingKind::UTF32,
        }
    }

    fn units(self, ch: char) -> usize {
        match self {
            PositionEncoding::Utf8 => ch.len_utf8(),
            PositionEncoding::Utf16 => ch.len_utf16(),
            PositionEncoding::Utf32 => 1,
        }
    }

    /// Convert a column (in this encoding) to a byte offset within `line`.
    /// Columns past the end clamp to the line length; a column that falls
    /// inside a character snaps to that character's start.
    pub fn column_to_byte(self, line: &str, column: u32) -> usize {
        let column = column as usize;
        let mut units = 0;
        for (byte_idx, ch) in line.char_indices() {
            let next = units + self.units(ch);
            if next > column {
                return byte_idx;
            }
            units = next;
        }
        line.len()
    }

    /// Convert a byte offset within `line` to a column in this encoding.
    pub fn byte_to_column(self, line: &str, byte: usize) -> u32 {
        let units: usize = line
            .char_indices()
            .take_while(|(idx, _)| *idx < byte)
            .map(|(_, ch)| self.units(ch))
            .sum();
        units as u32
    }

    /// Length of `text` in this encoding's units.
    pub fn len(self, text: &str) -> u32 {
        text.chars().map(|ch| self.units(ch)).sum::<usize>() as u32
    }
}
