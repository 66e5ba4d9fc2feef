use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of an editor node, unique within one [`EditorState`](super::EditorState).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(pub u64);

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Inline formatting bits of a text node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextFormat(pub u8);

impl TextFormat {
    pub const PLAIN: TextFormat = TextFormat(0);
    pub const BOLD: TextFormat = TextFormat(1);
    pub const ITALIC: TextFormat = TextFormat(1 << 1);
    pub const UNDERLINE: TextFormat = TextFormat(1 << 2);
    pub const STRIKETHROUGH: TextFormat = TextFormat(1 << 3);
    pub const CODE: TextFormat = TextFormat(1 << 4);

    pub fn contains(self, other: TextFormat) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: TextFormat) -> TextFormat {
        TextFormat(self.0 | other.0)
    }

    pub fn without(self, other: TextFormat) -> TextFormat {
        TextFormat(self.0 & !other.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EditorNodeKind {
    Root,
    Paragraph,
    Text { text: String, format: TextFormat },
}

/// One immutable record of the editor node map.
///
/// Element nodes (`Root`, `Paragraph`) own ordered `children`; text nodes are leaves.
/// Paragraphs live directly under the root, text nodes directly under paragraphs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorNode {
    pub key: NodeKey,
    pub parent: Option<NodeKey>,
    pub children: Vec<NodeKey>,
    pub kind: EditorNodeKind,
}

impl EditorNode {
    pub fn root(key: NodeKey) -> Self {
        Self {
            key,
            parent: None,
            children: Vec::new(),
            kind: EditorNodeKind::Root,
        }
    }

    pub fn paragraph(key: NodeKey, parent: NodeKey) -> Self {
        Self {
            key,
            parent: Some(parent),
            children: Vec::new(),
            kind: EditorNodeKind::Paragraph,
        }
    }

    pub fn text(key: NodeKey, parent: NodeKey, text: impl Into<String>) -> Self {
        Self {
            key,
            parent: Some(parent),
            children: Vec::new(),
            kind: EditorNodeKind::Text {
                text: text.into(),
                format: TextFormat::PLAIN,
            },
        }
    }

    pub fn is_element(&self) -> bool {
        !matches!(self.kind, EditorNodeKind::Text { .. })
    }

    pub fn text_content(&self) -> Option<&str> {
        match &self.kind {
            EditorNodeKind::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn format(&self) -> Option<TextFormat> {
        match &self.kind {
            EditorNodeKind::Text { format, .. } => Some(*format),
            _ => None,
        }
    }

    /// Length in chars for text nodes, 0 for elements.
    pub fn text_len(&self) -> usize {
        self.text_content().map(|t| t.chars().count()).unwrap_or(0)
    }
}

/// A position inside a text node, as a char offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub key: NodeKey,
    pub offset: usize,
}

impl Point {
    pub fn new(key: NodeKey, offset: usize) -> Self {
        Self { key, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Point,
    pub focus: Point,
}

impl Selection {
    pub fn caret(point: Point) -> Self {
        Self {
            anchor: point,
            focus: point,
        }
    }

    pub fn range(anchor: Point, focus: Point) -> Self {
        Self { anchor, focus }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }
}
