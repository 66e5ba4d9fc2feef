use serde::{Deserialize, Serialize};

use super::node::{EditorNode, NodeKey, Selection, TextFormat};
use super::EditorState;
use crate::error::{FlowError, Result};

/// A char range inside one text node, `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub key: NodeKey,
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub fn new(key: NodeKey, start: usize, end: usize) -> Self {
        Self { key, start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Primitive edits understood by [`EditorState::apply_edit`].
///
/// Every primitive has an inverse computed against the state it was applied to,
/// see [`EditOperation::inverse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOperation {
    InsertText {
        key: NodeKey,
        offset: usize,
        text: String,
    },
    DeleteText {
        range: TextRange,
    },
    /// Replaces the format of a whole text node. Use [`EditorState::format_range`]
    /// to format part of a node.
    FormatText {
        key: NodeKey,
        format: TextFormat,
    },
    /// Splits a text node at `offset`; the tail becomes `new_key`, the next sibling.
    SplitText {
        key: NodeKey,
        offset: usize,
        new_key: NodeKey,
    },
    /// Appends `next` (the following sibling, same format) to `key` and removes it.
    MergeText {
        key: NodeKey,
        next: NodeKey,
    },
    /// Inserts a subtree; `nodes[0]` is its root, the rest are its descendants.
    InsertNodes {
        parent: NodeKey,
        index: usize,
        nodes: Vec<EditorNode>,
    },
    RemoveNode {
        key: NodeKey,
    },
    SetSelection {
        selection: Option<Selection>,
    },
}

impl EditOperation {
    pub fn insert_text(key: NodeKey, offset: usize, text: impl Into<String>) -> Self {
        EditOperation::InsertText {
            key,
            offset,
            text: text.into(),
        }
    }

    pub fn delete_text(key: NodeKey, start: usize, end: usize) -> Self {
        EditOperation::DeleteText {
            range: TextRange::new(key, start, end),
        }
    }

    /// The operation undoing `self` when applied to the state produced by
    /// applying `self` to `before`.
    pub fn inverse(&self, before: &EditorState) -> Result<EditOperation> {
        let inverse = match self {
            EditOperation::InsertText { key, offset, text } => EditOperation::DeleteText {
                range: TextRange::new(*key, *offset, offset + text.chars().count()),
            },
            EditOperation::DeleteText { range } => {
                let text = before.text_of(range.key)?;
                EditOperation::InsertText {
                    key: range.key,
                    offset: range.start,
                    text: slice_chars(text, range.start, range.end)?.to_string(),
                }
            }
            EditOperation::FormatText { key, .. } => {
                let node = before.require(*key)?;
                let format = node
                    .format()
                    .ok_or_else(|| FlowError::InvalidEdit(format!("{} is not a text node", key)))?;
                EditOperation::FormatText { key: *key, format }
            }
            EditOperation::SplitText { key, new_key, .. } => EditOperation::MergeText {
                key: *key,
                next: *new_key,
            },
            EditOperation::MergeText { key, next } => EditOperation::SplitText {
                key: *key,
                offset: before.require(*key)?.text_len(),
                new_key: *next,
            },
            EditOperation::InsertNodes { nodes, .. } => {
                let root = nodes
                    .first()
                    .ok_or_else(|| FlowError::InvalidEdit("empty node insertion".to_string()))?;
                EditOperation::RemoveNode { key: root.key }
            }
            EditOperation::RemoveNode { key } => {
                let node = before.require(*key)?;
                let parent = node
                    .parent
                    .ok_or_else(|| FlowError::InvalidEdit("cannot remove the root".to_string()))?;
                let index = before
                    .require(parent)?
                    .children
                    .iter()
                    .position(|k| k == key)
                    .ok_or_else(|| FlowError::InvalidEdit(format!("{} is detached", key)))?;
                EditOperation::InsertNodes {
                    parent,
                    index,
                    nodes: before.subtree(*key),
                }
            }
            EditOperation::SetSelection { .. } => EditOperation::SetSelection {
                selection: before.selection,
            },
        };
        Ok(inverse)
    }
}

/// Byte index of the `offset`-th char; `None` when past the end.
pub(crate) fn byte_index(text: &str, offset: usize) -> Option<usize> {
    if offset == 0 {
        return Some(0);
    }
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .nth(offset)
}

pub(crate) fn slice_chars(text: &str, start: usize, end: usize) -> Result<&str> {
    if start > end {
        return Err(FlowError::InvalidEdit(format!(
            "range start {} is after end {}",
            start, end
        )));
    }
    let (Some(from), Some(to)) = (byte_index(text, start), byte_index(text, end)) else {
        return Err(FlowError::InvalidEdit(format!(
            "range {}..{} is out of bounds",
            start, end
        )));
    };
    Ok(&text[from..to])
}
