// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target resolution grammar: map a client-supplied string to a
//! `{tabId, paneId}` pair.

use uuid::Uuid;

use super::{leaf_ids, Layout, NodeId, Tab, TabId, Target};

/// Resolve `raw` against `layout` using the five ordered rules. First match
/// wins; an exact tab title always wins over `tab.pane` parsing even when
/// `raw` would also parse as one (the `alpha.1` tie-break).
pub fn resolve_target(layout: &Layout, raw: &str) -> Target {
    if let Some(target) = resolve_exact_pane(layout, raw) {
        return target;
    }
    if let Some(target) = resolve_exact_tab(layout, raw) {
        return target;
    }
    if let Some(target) = resolve_compound(layout, raw) {
        return target;
    }
    if let Some(target) = resolve_bare_numeric(layout, raw) {
        return target;
    }
    Target { tab_id: None, pane_id: None, message: Some("target not resolved".to_owned()) }
}

fn parse_node_id(raw: &str) -> Option<NodeId> {
    raw.parse::<Uuid>().ok().map(NodeId::from_uuid)
}

fn parse_tab_id(raw: &str) -> Option<TabId> {
    raw.parse::<Uuid>().ok().map(TabId::from_uuid)
}

/// Rule 1: exact pane ID, searched across every tab.
fn resolve_exact_pane(layout: &Layout, raw: &str) -> Option<Target> {
    let pane_id = parse_node_id(raw)?;
    for tab in &layout.tabs {
        if leaf_ids(tab).contains(&pane_id) {
            return Some(Target { tab_id: Some(tab.id), pane_id: Some(pane_id), message: None });
        }
    }
    None
}

/// Rule 2: exact tab ID, then exact tab title.
fn resolve_exact_tab(layout: &Layout, raw: &str) -> Option<Target> {
    let by_id = parse_tab_id(raw).and_then(|id| layout.tabs.iter().find(|t| t.id == id));
    let tab = by_id.or_else(|| layout.tabs.iter().find(|t| t.title == raw))?;
    Some(Target {
        tab_id: Some(tab.id),
        pane_id: Some(tab.active_pane_id),
        message: Some("tab matched; active pane used".to_owned()),
    })
}

/// Rule 3: `tab.pane` or `session:window.pane`.
fn resolve_compound(layout: &Layout, raw: &str) -> Option<Target> {
    let stripped = raw.strip_prefix("session:").unwrap_or(raw);
    let (left, right) = stripped.split_once('.')?;
    if left.is_empty() {
        return None;
    }

    let tab = resolve_tab_by_id_or_title(layout, left)?;

    let Some(index) = right.parse::<usize>().ok().filter(|n| *n >= 1) else {
        return Some(Target {
            tab_id: Some(tab.id),
            pane_id: Some(tab.active_pane_id),
            message: Some("missing pane index; active pane used".to_owned()),
        });
    };

    let leaves = leaf_ids(tab);
    match leaves.get(index - 1) {
        Some(pane_id) => Some(Target { tab_id: Some(tab.id), pane_id: Some(*pane_id), message: None }),
        None => Some(Target {
            tab_id: Some(tab.id),
            pane_id: Some(tab.active_pane_id),
            message: Some("pane index out of range; active pane used".to_owned()),
        }),
    }
}

/// Rule 4: bare numeric index into the active tab's leaf enumeration.
fn resolve_bare_numeric(layout: &Layout, raw: &str) -> Option<Target> {
    let index = raw.parse::<usize>().ok().filter(|n| *n >= 1)?;
    let tab_id = layout.active_tab_id?;
    let tab = layout.tabs.iter().find(|t| t.id == tab_id)?;
    let leaves = leaf_ids(tab);
    leaves.get(index - 1).map(|pane_id| Target { tab_id: Some(tab.id), pane_id: Some(*pane_id), message: None })
}

fn resolve_tab_by_id_or_title<'a>(layout: &'a Layout, raw: &str) -> Option<&'a Tab> {
    parse_tab_id(raw)
        .and_then(|id| layout.tabs.iter().find(|t| t.id == id))
        .or_else(|| layout.tabs.iter().find(|t| t.title == raw))
}

#[cfg(test)]
#[path = "resolve_tests.rs"]
mod tests;
