// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tab/pane layout tree and the operations that mutate it.
//!
//! Each tab owns a binary tree of [`Node`]: a single [`Leaf`] or a [`Split`]
//! of exactly two children. Ownership is one-directional (a `Tab` owns its
//! tree outright, nodes are never shared or cyclic) so the tree can be
//! mutated with plain `&mut` recursive walks.

pub mod resolve;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::terminal::TerminalId;

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(Uuid);

impl TabId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one node in a tab's tree — a leaf pane or a split. Leaves and
/// splits share one ID namespace so `resizePane`'s `splitId` argument can be
/// resolved the same way a `paneId` is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a leaf pane displays. Everything but `Terminal` is a stub payload —
/// the renderers that interpret browser/editor/agent-chat content live
/// outside this subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Content {
    Terminal { terminal_id: TerminalId },
    Browser { url: String },
    Editor { file: String },
    AgentChat { session_ref: String },
    Picker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Horizontal,
    Vertical,
}

/// A tab's layout tree: either a single leaf, or a split of exactly two
/// children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Leaf { id: NodeId, content: Content },
    Split { id: NodeId, direction: Direction, sizes: (u8, u8), children: (Box<Node>, Box<Node>) },
}

impl Node {
    fn id(&self) -> NodeId {
        match self {
            Node::Leaf { id, .. } => *id,
            Node::Split { id, .. } => *id,
        }
    }

    fn leaf(content: Content) -> Self {
        Node::Leaf { id: NodeId::new(), content }
    }

    /// Leaves in left-to-right reading order, as used by numeric target
    /// indices and `findSplitForPane`.
    fn leaves(&self) -> Vec<&Node> {
        match self {
            Node::Leaf { .. } => vec![self],
            Node::Split { children, .. } => {
                let mut out = children.0.leaves();
                out.extend(children.1.leaves());
                out
            }
        }
    }

    fn find(&self, id: NodeId) -> Option<&Node> {
        if self.id() == id {
            return Some(self);
        }
        match self {
            Node::Leaf { .. } => None,
            Node::Split { children, .. } => children.0.find(id).or_else(|| children.1.find(id)),
        }
    }

    fn find_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if self.id() == id {
            return Some(self);
        }
        match self {
            Node::Leaf { .. } => None,
            Node::Split { children, .. } => {
                if children.0.find(id).is_some() {
                    children.0.find_mut(id)
                } else {
                    children.1.find_mut(id)
                }
            }
        }
    }

}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    pub title: String,
    pub root: Node,
    pub active_pane_id: NodeId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Layout {
    pub tabs: Vec<Tab>,
    pub active_tab_id: Option<TabId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("unknown tab")]
    TabNotFound,
    #[error("unknown pane")]
    PaneNotFound,
}

/// A resolved target, or a diagnostic when nothing matched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pane_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    fn tab(&self, id: TabId) -> Result<&Tab, Error> {
        self.tabs.iter().find(|t| t.id == id).ok_or(Error::TabNotFound)
    }

    fn tab_mut(&mut self, id: TabId) -> Result<&mut Tab, Error> {
        self.tabs.iter_mut().find(|t| t.id == id).ok_or(Error::TabNotFound)
    }

    /// Create a new tab with a single leaf pane holding `content`.
    pub fn create_tab(&mut self, title: impl Into<String>, content: Content) -> (TabId, NodeId) {
        let leaf = Node::leaf(content);
        let pane_id = leaf.id();
        let tab_id = TabId::new();
        self.tabs.push(Tab { id: tab_id, title: title.into(), root: leaf, active_pane_id: pane_id });
        self.active_tab_id = Some(tab_id);
        (tab_id, pane_id)
    }

    pub fn select_tab(&mut self, id: TabId) -> Result<(), Error> {
        self.tab(id)?;
        self.active_tab_id = Some(id);
        Ok(())
    }

    pub fn rename_tab(&mut self, id: TabId, name: impl Into<String>) -> Result<(), Error> {
        self.tab_mut(id)?.title = name.into();
        Ok(())
    }

    pub fn close_tab(&mut self, id: TabId) -> Result<(), Error> {
        let before = self.tabs.len();
        self.tabs.retain(|t| t.id != id);
        if self.tabs.len() == before {
            return Err(Error::TabNotFound);
        }
        if self.active_tab_id == Some(id) {
            self.active_tab_id = self.tabs.first().map(|t| t.id);
        }
        Ok(())
    }

    /// Split the pane `pane_id` into two: the existing content stays in
    /// place, a new leaf holding `content` becomes its sibling. The parent
    /// becomes (or, if `pane_id` was already a split's child, remains) a
    /// 50/50 split unless `sizes` overrides it.
    pub fn split_pane(
        &mut self,
        pane_id: NodeId,
        direction: Direction,
        content: Content,
        sizes: Option<(u8, u8)>,
    ) -> Result<NodeId, Error> {
        let tab = self.tabs.iter_mut().find(|t| t.root.find(pane_id).is_some()).ok_or(Error::PaneNotFound)?;
        let target = tab.root.find_mut(pane_id).ok_or(Error::PaneNotFound)?;
        let old = std::mem::replace(target, Node::leaf(Content::Picker));
        let new_leaf = Node::leaf(content);
        let new_id = new_leaf.id();
        *target = Node::Split {
            id: NodeId::new(),
            direction,
            sizes: sizes.unwrap_or((50, 50)),
            children: (Box::new(old), Box::new(new_leaf)),
        };
        tab.active_pane_id = new_id;
        Ok(new_id)
    }

    /// Close `pane_id`. If it's the sole leaf of its tab, close the tab
    /// outright; otherwise promote its sibling into the parent split's
    /// place.
    pub fn close_pane(&mut self, pane_id: NodeId) -> Result<(), Error> {
        let tab_idx =
            self.tabs.iter().position(|t| t.root.find(pane_id).is_some()).ok_or(Error::PaneNotFound)?;

        if self.tabs[tab_idx].root.id() == pane_id {
            let tab_id = self.tabs[tab_idx].id;
            return self.close_tab(tab_id);
        }

        let tab = &mut self.tabs[tab_idx];
        let (parent, side) = find_parent_mut(&mut tab.root, pane_id).ok_or(Error::PaneNotFound)?;
        let Node::Split { children, .. } = parent else {
            return Err(Error::PaneNotFound);
        };
        let sibling = if side == 0 { &mut children.1 } else { &mut children.0 };
        let promoted = std::mem::replace(sibling.as_mut(), Node::leaf(Content::Picker));
        *parent = promoted;
        tab.active_pane_id = tab.root.leaves().first().map(|n| n.id()).unwrap_or(tab.active_pane_id);
        Ok(())
    }

    /// Resize the split identified by `split_id` (or resolved transitively
    /// from a child pane id via `find_split_for_pane`). `sizes` is
    /// normalized so the two parts always sum to 100.
    pub fn resize_pane(&mut self, tab_id: TabId, split_or_pane_id: NodeId, sizes: (u8, u8)) -> Result<(), Error> {
        let tab = self.tab_mut(tab_id)?;
        let split_id = find_split_for_pane(&tab.root, split_or_pane_id).unwrap_or(split_or_pane_id);
        let node = tab.root.find_mut(split_id).ok_or(Error::PaneNotFound)?;
        let Node::Split { sizes: current, .. } = node else {
            return Err(Error::PaneNotFound);
        };
        *current = normalize_sizes(sizes);
        Ok(())
    }

    /// Swap the contents of two leaves in place; node identities (and thus
    /// `active_pane_id`) are unaffected.
    pub fn swap_pane(&mut self, tab_id: TabId, pane_id: NodeId, other_id: NodeId) -> Result<(), Error> {
        let tab = self.tab_mut(tab_id)?;
        let a_content = leaf_content(&tab.root, pane_id).ok_or(Error::PaneNotFound)?.clone();
        let b_content = leaf_content(&tab.root, other_id).ok_or(Error::PaneNotFound)?.clone();
        *leaf_content_mut(&mut tab.root, pane_id).ok_or(Error::PaneNotFound)? = b_content;
        *leaf_content_mut(&mut tab.root, other_id).ok_or(Error::PaneNotFound)? = a_content;
        Ok(())
    }

    /// Replace a pane's content in place (initial attach, or respawn after
    /// the underlying terminal exits).
    pub fn attach_pane_content(&mut self, tab_id: TabId, pane_id: NodeId, content: Content) -> Result<(), Error> {
        let tab = self.tab_mut(tab_id)?;
        *leaf_content_mut(&mut tab.root, pane_id).ok_or(Error::PaneNotFound)? = content;
        Ok(())
    }
}

fn normalize_sizes((a, b): (u8, u8)) -> (u8, u8) {
    let total = a as u32 + b as u32;
    if total == 0 {
        return (50, 50);
    }
    let norm_a = ((a as u32 * 100) / total) as u8;
    (norm_a, 100 - norm_a)
}

fn find_parent_mut(root: &mut Node, id: NodeId) -> Option<(&mut Node, usize)> {
    match root {
        Node::Leaf { .. } => None,
        Node::Split { children, .. } => {
            if children.0.id() == id {
                return Some((root, 0));
            }
            if children.1.id() == id {
                return Some((root, 1));
            }
            if children.0.find(id).is_some() {
                find_parent_mut(&mut children.0, id)
            } else if children.1.find(id).is_some() {
                find_parent_mut(&mut children.1, id)
            } else {
                None
            }
        }
    }
}

/// Resolve the parent split's id for any pane/split id inside `root`: `id`
/// itself if it's already a split, otherwise the split immediately above
/// the leaf `id`.
fn find_split_for_pane(root: &Node, id: NodeId) -> Option<NodeId> {
    match root.find(id)? {
        Node::Split { id, .. } => Some(*id),
        Node::Leaf { .. } => parent_split_id(root, id),
    }
}

fn parent_split_id(root: &Node, id: NodeId) -> Option<NodeId> {
    match root {
        Node::Leaf { .. } => None,
        Node::Split { id: split_id, children, .. } => {
            if children.0.id() == id || children.1.id() == id {
                return Some(*split_id);
            }
            parent_split_id(&children.0, id).or_else(|| parent_split_id(&children.1, id))
        }
    }
}

fn leaf_content(root: &Node, id: NodeId) -> Option<&Content> {
    match root.find(id)? {
        Node::Leaf { content, .. } => Some(content),
        Node::Split { .. } => None,
    }
}

fn leaf_content_mut(root: &mut Node, id: NodeId) -> Option<&mut Content> {
    match root.find_mut(id)? {
        Node::Leaf { content, .. } => Some(content),
        Node::Split { .. } => None,
    }
}

/// Left-to-right leaf enumeration of a tab's tree, used by numeric target
/// indices when resolving a target string.
pub fn leaf_ids(tab: &Tab) -> Vec<NodeId> {
    tab.root.leaves().into_iter().map(|n| n.id()).collect()
}
