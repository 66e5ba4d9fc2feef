//! # Editor State
//!
//! The rich-text document of one text-bearing node, modelled as an immutable value.
//!
//! An [`EditorState`] is a node map plus a selection. Applying an edit never mutates
//! the current value: [`EditorState::apply_edit`] copies the map (the node records
//! themselves are shared behind `Arc`), applies one primitive, and returns a new
//! state. Old values therefore stay valid for as long as someone holds them, which
//! is exactly how the undo stack keeps history.
//!
//! ## Document Shape
//!
//! ```text
//! Root
//! ├── Paragraph
//! │   ├── Text "Hello "
//! │   └── Text "world"  (bold)
//! └── Paragraph
//!     └── Text "second line"
//! ```
//!
//! ## Primitives
//!
//! [`EditOperation`] is a closed set: insert/delete text, format a text node, split
//! and merge text nodes, insert and remove subtrees, set the selection. Each has an
//! inverse ([`EditOperation::inverse`]). Higher-level gestures are expanded into
//! primitives by planners such as [`EditorState::plan_insert_text`] and
//! [`EditorState::format_range`].
//!
//! ## Keys
//!
//! Keys are allocated from a counter stored in the state itself, so replaying the same
//! operations against the same state always yields the same keys.

mod node;
mod ops;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{FlowError, Result};

pub use node::{EditorNode, EditorNodeKind, NodeKey, Point, Selection, TextFormat};
pub use ops::{EditOperation, TextRange};

use ops::{byte_index, slice_chars};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorState {
    #[serde(with = "node_list")]
    nodes: Arc<BTreeMap<NodeKey, Arc<EditorNode>>>,
    root: NodeKey,
    selection: Option<Selection>,
    read_only: bool,
    next_key: u64,
}

impl Default for EditorState {
    fn default() -> Self {
        Self::create_empty()
    }
}

impl EditorState {
    /// A document holding only an empty root, without selection.
    pub fn create_empty() -> Self {
        let root = NodeKey(0);
        let mut nodes = BTreeMap::new();
        nodes.insert(root, Arc::new(EditorNode::root(root)));
        Self {
            nodes: Arc::new(nodes),
            root,
            selection: None,
            read_only: false,
            next_key: 1,
        }
    }

    pub fn root_key(&self) -> NodeKey {
        self.root
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text_nodes().iter().all(|n| n.text_len() == 0)
    }

    /// The key the next inserted node should use.
    pub fn next_key(&self) -> NodeKey {
        NodeKey(self.next_key)
    }

    pub fn node(&self, key: NodeKey) -> Option<&EditorNode> {
        self.nodes.get(&key).map(|n| n.as_ref())
    }

    pub(crate) fn require(&self, key: NodeKey) -> Result<&EditorNode> {
        self.node(key)
            .ok_or_else(|| FlowError::InvalidEdit(format!("unknown editor node {}", key)))
    }

    pub(crate) fn text_of(&self, key: NodeKey) -> Result<&str> {
        self.require(key)?
            .text_content()
            .ok_or_else(|| FlowError::InvalidEdit(format!("{} is not a text node", key)))
    }

    /// Returns a copy of this state with the read-only flag set.
    pub fn with_read_only(&self, read_only: bool) -> EditorState {
        EditorState {
            read_only,
            ..self.clone()
        }
    }

    /// Nodes of the subtree rooted at `key`, in pre-order.
    pub fn subtree(&self, key: NodeKey) -> Vec<EditorNode> {
        let mut out = Vec::new();
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            if let Some(node) = self.node(k) {
                stack.extend(node.children.iter().rev().copied());
                out.push(node.clone());
            }
        }
        out
    }

    /// Text nodes in document order.
    pub fn text_nodes(&self) -> Vec<&EditorNode> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(k) = stack.pop() {
            if let Some(node) = self.node(k) {
                if node.is_element() {
                    stack.extend(node.children.iter().rev().copied());
                } else {
                    out.push(node);
                }
            }
        }
        out
    }

    /// Plain text of the document, one line per paragraph.
    pub fn text_content(&self) -> String {
        let Some(root) = self.node(self.root) else {
            return String::new();
        };
        root.children
            .iter()
            .filter_map(|k| self.node(*k))
            .map(|paragraph| {
                paragraph
                    .children
                    .iter()
                    .filter_map(|k| self.node(*k).and_then(|n| n.text_content()))
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Produces the state resulting from `op`. `self` is left untouched.
    pub fn apply_edit(&self, op: &EditOperation) -> Result<EditorState> {
        if self.read_only {
            return Err(FlowError::ReadOnlyViolation);
        }
        let mut draft = Draft::from_state(self);
        draft.apply(op)?;
        Ok(draft.finish())
    }

    /// Applies `ops` in order; fails without partial effect if any op fails.
    pub fn apply_edits(&self, ops: &[EditOperation]) -> Result<EditorState> {
        if self.read_only {
            return Err(FlowError::ReadOnlyViolation);
        }
        let mut draft = Draft::from_state(self);
        for op in ops {
            draft.apply(op)?;
        }
        Ok(draft.finish())
    }

    /// Operations that type `text` at the caret.
    ///
    /// A selection inside one text node is replaced. Without a usable selection the
    /// text is appended to the last text node, creating a paragraph when the document
    /// has none.
    pub fn plan_insert_text(&self, text: &str) -> Vec<EditOperation> {
        let typed = text.chars().count();

        if let Some(sel) = self.selection {
            let in_text = self
                .node(sel.anchor.key)
                .map(|n| !n.is_element())
                .unwrap_or(false);
            if sel.anchor.key == sel.focus.key && in_text {
                let key = sel.anchor.key;
                let start = sel.anchor.offset.min(sel.focus.offset);
                let end = sel.anchor.offset.max(sel.focus.offset);
                let mut ops = Vec::new();
                if end > start {
                    ops.push(EditOperation::delete_text(key, start, end));
                }
                ops.push(EditOperation::insert_text(key, start, text));
                return ops;
            }
        }

        if let Some(last) = self.text_nodes().last() {
            let len = last.text_len();
            return vec![
                EditOperation::insert_text(last.key, len, text),
                EditOperation::SetSelection {
                    selection: Some(Selection::caret(Point::new(last.key, len + typed))),
                },
            ];
        }

        let key = self.next_key();
        let last_paragraph = self
            .node(self.root)
            .and_then(|root| root.children.last().copied())
            .and_then(|k| self.node(k));

        let insert = match last_paragraph {
            Some(paragraph) => EditOperation::InsertNodes {
                parent: paragraph.key,
                index: paragraph.children.len(),
                nodes: vec![EditorNode::text(key, paragraph.key, text)],
            },
            None => {
                let text_key = NodeKey(key.0 + 1);
                let mut paragraph = EditorNode::paragraph(key, self.root);
                paragraph.children.push(text_key);
                EditOperation::InsertNodes {
                    parent: self.root,
                    index: self.node(self.root).map(|r| r.children.len()).unwrap_or(0),
                    nodes: vec![paragraph, EditorNode::text(text_key, key, text)],
                }
            }
        };
        let caret_key = match &insert {
            EditOperation::InsertNodes { nodes, .. } => nodes.last().map(|n| n.key).unwrap_or(key),
            _ => key,
        };
        vec![
            insert,
            EditOperation::SetSelection {
                selection: Some(Selection::caret(Point::new(caret_key, typed))),
            },
        ]
    }

    /// Operations applying `format` to `range`, splitting the text node so only
    /// the range changes.
    pub fn format_range(&self, range: TextRange, format: TextFormat) -> Result<Vec<EditOperation>> {
        let text = self.text_of(range.key)?;
        slice_chars(text, range.start, range.end)?;
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let len = text.chars().count();
        let mut ops = Vec::new();
        let mut next = self.next_key;
        let mut target = range.key;

        if range.end < len {
            ops.push(EditOperation::SplitText {
                key: range.key,
                offset: range.end,
                new_key: NodeKey(next),
            });
            next += 1;
        }
        if range.start > 0 {
            ops.push(EditOperation::SplitText {
                key: range.key,
                offset: range.start,
                new_key: NodeKey(next),
            });
            target = NodeKey(next);
        }
        ops.push(EditOperation::FormatText {
            key: target,
            format,
        });
        Ok(ops)
    }
}

/// The node map is written as a list: map keys would become strings, which do not
/// read back as integers once nested inside a tagged payload.
mod node_list {
    use super::{EditorNode, NodeKey};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    type NodeMap = Arc<BTreeMap<NodeKey, Arc<EditorNode>>>;

    pub fn serialize<S: Serializer>(nodes: &NodeMap, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(nodes.values().map(|n| n.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NodeMap, D::Error> {
        let list = Vec::<EditorNode>::deserialize(deserializer)?;
        Ok(Arc::new(
            list.into_iter().map(|n| (n.key, Arc::new(n))).collect(),
        ))
    }
}

/// Working copy used while applying edits.
struct Draft {
    nodes: BTreeMap<NodeKey, Arc<EditorNode>>,
    root: NodeKey,
    selection: Option<Selection>,
    read_only: bool,
    next_key: u64,
}

impl Draft {
    fn from_state(state: &EditorState) -> Self {
        Self {
            nodes: state.nodes.as_ref().clone(),
            root: state.root,
            selection: state.selection,
            read_only: state.read_only,
            next_key: state.next_key,
        }
    }

    fn finish(self) -> EditorState {
        EditorState {
            nodes: Arc::new(self.nodes),
            root: self.root,
            selection: self.selection,
            read_only: self.read_only,
            next_key: self.next_key,
        }
    }

    fn get(&self, key: NodeKey) -> Result<&EditorNode> {
        self.nodes
            .get(&key)
            .map(|n| n.as_ref())
            .ok_or_else(|| FlowError::InvalidEdit(format!("unknown editor node {}", key)))
    }

    fn put(&mut self, node: EditorNode) {
        self.nodes.insert(node.key, Arc::new(node));
    }

    fn text_parts(&self, key: NodeKey) -> Result<(EditorNode, String, TextFormat)> {
        let node = self.get(key)?.clone();
        match &node.kind {
            EditorNodeKind::Text { text, format } => {
                let (text, format) = (text.clone(), *format);
                Ok((node, text, format))
            }
            _ => Err(FlowError::InvalidEdit(format!("{} is not a text node", key))),
        }
    }

    fn reserve(&mut self, key: NodeKey) {
        self.next_key = self.next_key.max(key.0 + 1);
    }

    fn map_points(&mut self, f: impl Fn(Point) -> Point) {
        if let Some(sel) = &mut self.selection {
            sel.anchor = f(sel.anchor);
            sel.focus = f(sel.focus);
        }
    }

    fn apply(&mut self, op: &EditOperation) -> Result<()> {
        match op {
            EditOperation::InsertText { key, offset, text } => {
                let (mut node, mut current, format) = self.text_parts(*key)?;
                let at = byte_index(&current, *offset).ok_or_else(|| {
                    FlowError::InvalidEdit(format!("offset {} is out of bounds", offset))
                })?;
                current.insert_str(at, text);
                node.kind = EditorNodeKind::Text {
                    text: current,
                    format,
                };
                self.put(node);

                let (key, offset, n) = (*key, *offset, text.chars().count());
                self.map_points(|p| {
                    if p.key == key && p.offset >= offset {
                        Point::new(key, p.offset + n)
                    } else {
                        p
                    }
                });
            }
            EditOperation::DeleteText { range } => {
                let (mut node, current, format) = self.text_parts(range.key)?;
                slice_chars(&current, range.start, range.end)?;
                let head: String = current.chars().take(range.start).collect();
                let tail: String = current.chars().skip(range.end).collect();
                node.kind = EditorNodeKind::Text {
                    text: head + &tail,
                    format,
                };
                self.put(node);

                let range = *range;
                self.map_points(|p| {
                    if p.key != range.key {
                        p
                    } else if p.offset > range.end {
                        Point::new(p.key, p.offset - range.len())
                    } else if p.offset > range.start {
                        Point::new(p.key, range.start)
                    } else {
                        p
                    }
                });
            }
            EditOperation::FormatText { key, format } => {
                let (mut node, text, _) = self.text_parts(*key)?;
                node.kind = EditorNodeKind::Text {
                    text,
                    format: *format,
                };
                self.put(node);
            }
            EditOperation::SplitText {
                key,
                offset,
                new_key,
            } => {
                if self.nodes.contains_key(new_key) {
                    return Err(FlowError::InvalidEdit(format!("{} already exists", new_key)));
                }
                let (mut node, current, format) = self.text_parts(*key)?;
                let at = byte_index(&current, *offset).ok_or_else(|| {
                    FlowError::InvalidEdit(format!("offset {} is out of bounds", offset))
                })?;
                let parent_key = node
                    .parent
                    .ok_or_else(|| FlowError::InvalidEdit(format!("{} is detached", key)))?;
                let mut parent = self.get(parent_key)?.clone();
                let index = parent
                    .children
                    .iter()
                    .position(|k| k == key)
                    .ok_or_else(|| FlowError::InvalidEdit(format!("{} is detached", key)))?;

                let tail = EditorNode {
                    key: *new_key,
                    parent: Some(parent_key),
                    children: Vec::new(),
                    kind: EditorNodeKind::Text {
                        text: current[at..].to_string(),
                        format,
                    },
                };
                node.kind = EditorNodeKind::Text {
                    text: current[..at].to_string(),
                    format,
                };
                parent.children.insert(index + 1, *new_key);
                self.put(node);
                self.put(tail);
                self.put(parent);
                self.reserve(*new_key);

                let (key, offset, new_key) = (*key, *offset, *new_key);
                self.map_points(|p| {
                    if p.key == key && p.offset > offset {
                        Point::new(new_key, p.offset - offset)
                    } else {
                        p
                    }
                });
            }
            EditOperation::MergeText { key, next } => {
                let (mut node, head, format) = self.text_parts(*key)?;
                let (follower, tail, next_format) = self.text_parts(*next)?;
                if format != next_format {
                    return Err(FlowError::InvalidEdit(format!(
                        "cannot merge {} into {}: formats differ",
                        next, key
                    )));
                }
                let parent_key = node
                    .parent
                    .filter(|p| follower.parent == Some(*p))
                    .ok_or_else(|| {
                        FlowError::InvalidEdit(format!("{} and {} are not siblings", key, next))
                    })?;
                let mut parent = self.get(parent_key)?.clone();
                let index = parent.children.iter().position(|k| k == key);
                if index.map(|i| parent.children.get(i + 1)) != Some(Some(next)) {
                    return Err(FlowError::InvalidEdit(format!(
                        "{} does not directly follow {}",
                        next, key
                    )));
                }

                let head_len = head.chars().count();
                node.kind = EditorNodeKind::Text {
                    text: head + &tail,
                    format,
                };
                parent.children.retain(|k| k != next);
                self.nodes.remove(next);
                self.put(node);
                self.put(parent);

                let (key, next) = (*key, *next);
                self.map_points(|p| {
                    if p.key == next {
                        Point::new(key, p.offset + head_len)
                    } else {
                        p
                    }
                });
            }
            EditOperation::InsertNodes {
                parent,
                index,
                nodes,
            } => self.insert_nodes(*parent, *index, nodes)?,
            EditOperation::RemoveNode { key } => {
                if *key == self.root {
                    return Err(FlowError::InvalidEdit("cannot remove the root".to_string()));
                }
                let node = self.get(*key)?.clone();
                if let Some(parent_key) = node.parent {
                    let mut parent = self.get(parent_key)?.clone();
                    parent.children.retain(|k| k != key);
                    self.put(parent);
                }
                let mut stack = vec![*key];
                while let Some(k) = stack.pop() {
                    if let Some(removed) = self.nodes.remove(&k) {
                        stack.extend(removed.children.iter().copied());
                    }
                }
            }
            EditOperation::SetSelection { selection } => {
                if let Some(sel) = selection {
                    for point in [sel.anchor, sel.focus] {
                        let (_, text, _) = self.text_parts(point.key)?;
                        if point.offset > text.chars().count() {
                            return Err(FlowError::InvalidEdit(format!(
                                "selection offset {} is out of bounds",
                                point.offset
                            )));
                        }
                    }
                }
                self.selection = *selection;
            }
        }
        self.clamp_selection();
        Ok(())
    }

    fn insert_nodes(&mut self, parent: NodeKey, index: usize, nodes: &[EditorNode]) -> Result<()> {
        let Some(first) = nodes.first() else {
            return Err(FlowError::InvalidEdit("empty node insertion".to_string()));
        };
        if first.parent != Some(parent) {
            return Err(FlowError::InvalidEdit(format!(
                "{} does not name {} as its parent",
                first.key, parent
            )));
        }
        let mut target = self.get(parent)?.clone();
        if index > target.children.len() {
            return Err(FlowError::InvalidEdit(format!(
                "index {} is out of bounds",
                index
            )));
        }

        let incoming: BTreeMap<NodeKey, &EditorNode> = nodes.iter().map(|n| (n.key, n)).collect();
        if incoming.len() != nodes.len() {
            return Err(FlowError::InvalidEdit("duplicate keys in insertion".to_string()));
        }
        for node in nodes {
            if self.nodes.contains_key(&node.key) {
                return Err(FlowError::InvalidEdit(format!("{} already exists", node.key)));
            }
            let parent_kind = match node.parent {
                Some(p) if p == parent && node.key == first.key => &target.kind,
                Some(p) => match incoming.get(&p) {
                    Some(owner) if owner.children.contains(&node.key) => &owner.kind,
                    _ => {
                        return Err(FlowError::InvalidEdit(format!(
                            "{} is not attached inside the inserted subtree",
                            node.key
                        )))
                    }
                },
                None => {
                    return Err(FlowError::InvalidEdit("cannot insert a root".to_string()));
                }
            };
            let allowed = match (&node.kind, parent_kind) {
                (EditorNodeKind::Paragraph, EditorNodeKind::Root) => true,
                (EditorNodeKind::Text { .. }, EditorNodeKind::Paragraph) => {
                    node.children.is_empty()
                }
                _ => false,
            };
            if !allowed {
                return Err(FlowError::InvalidEdit(format!(
                    "{} cannot be placed there",
                    node.key
                )));
            }
            if node.children.iter().any(|c| !incoming.contains_key(c)) {
                return Err(FlowError::InvalidEdit(format!(
                    "{} references children outside the insertion",
                    node.key
                )));
            }
        }

        target.children.insert(index, first.key);
        self.put(target);
        for node in nodes {
            self.reserve(node.key);
            self.put(node.clone());
        }
        Ok(())
    }

    fn clamp_selection(&mut self) {
        let Some(sel) = self.selection else {
            return;
        };
        let clamp = |p: Point| {
            self.nodes
                .get(&p.key)
                .filter(|n| !n.is_element())
                .map(|n| Point::new(p.key, p.offset.min(n.text_len())))
        };
        self.selection = match (clamp(sel.anchor), clamp(sel.focus)) {
            (Some(anchor), Some(focus)) => Some(Selection { anchor, focus }),
            _ => None,
        };
    }
}
