use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Plain,
    #[default]
    Styled,
}

/// Requests handled by the screen actor.
#[derive(Debug, Clone)]
pub enum Query {
    /// Immutable copy of the current screen contents and cursor.
    Snapshot { format: Format },
    /// Snapshot plus a broadcast subscription, taken atomically so the
    /// subscriber sees exactly the chunks emitted after the snapshot.
    Join { format: Format },
    /// Reallocate the grid. The emulator preserves the overlapping region
    /// and clamps the cursor into the new bounds.
    Resize { cols: usize, rows: usize },
}

#[derive(Debug)]
pub enum QueryResponse {
    Snapshot(SnapshotResponse),
    Joined(SnapshotResponse, tokio::sync::broadcast::Receiver<bytes::Bytes>),
    Ok,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotResponse {
    pub lines: Vec<FormattedLine>,
    pub cursor: Cursor,
    pub cols: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Cursor {
    pub row: usize,
    pub col: usize,
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FormattedLine {
    Plain(String),
    Styled(Vec<Span>),
}

impl FormattedLine {
    /// Text content regardless of formatting, used by tests and comparisons.
    pub fn text(&self) -> String {
        match self {
            FormattedLine::Plain(s) => s.clone(),
            FormattedLine::Styled(spans) => spans.iter().map(|s| s.text.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Span {
    pub text: String,
    #[serde(flatten)]
    pub style: Style,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Style {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fg: Option<Color>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg: Option<Color>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub bold: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub italic: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub underline: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub inverse: bool,
}

impl Style {
    pub fn is_default(&self) -> bool {
        *self == Style::default()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Indexed(u8),
    Rgb { r: u8, g: u8, b: u8 },
}
