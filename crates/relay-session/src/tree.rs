// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::message::Message;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("unknown message id: {0}")]
    UnknownMessage(String),
    #[error("old_ids must form a contiguous prefix of the current path")]
    NotAContiguousPrefix,
}

/// A node in `get_tree()`'s output: a message plus the ids of its children,
/// in append order.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub message: Message,
    pub children: Vec<String>,
}

/// A directed tree of messages keyed by id, plus a `current_id` pointer
/// naming the active leaf.
///
/// New appends set the new node's `parent_id = current_id` and advance
/// `current_id`. Branching sets `current_id` to any existing node;
/// subsequent appends fork from there. The path (root to `current_id`) is
/// the LLM context; the tree is the full structure. Branching never deletes
/// nodes — it only re-parents future appends.
#[derive(Debug, Default)]
pub struct SessionStore {
    nodes: HashMap<String, Message>,
    children: HashMap<String, Vec<String>>,
    current_id: Option<String>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, stamping `parent_id` with the current leaf and
    /// advancing `current_id` to the new node. Returns the assigned id (the
    /// message's own id if already set and non-empty, otherwise a fresh one).
    pub fn append(&mut self, mut message: Message) -> String {
        if message.id.is_empty() {
            message.id = Uuid::new_v4().to_string();
        }
        message.parent_id = self.current_id.clone();
        let id = message.id.clone();
        if let Some(parent) = &message.parent_id {
            self.children.entry(parent.clone()).or_default().push(id.clone());
        }
        self.nodes.insert(id.clone(), message);
        self.current_id = Some(id.clone());
        id
    }

    /// Append several messages in order, each parented to the previous (the
    /// first parented to the prior `current_id`).
    pub fn append_many(&mut self, messages: impl IntoIterator<Item = Message>) -> Vec<String> {
        messages.into_iter().map(|m| self.append(m)).collect()
    }

    /// Move `current_id` to an existing node. Errors if the id is unknown.
    pub fn branch(&mut self, message_id: impl Into<String>) -> Result<(), TreeError> {
        let id = message_id.into();
        if !self.nodes.contains_key(&id) {
            return Err(TreeError::UnknownMessage(id));
        }
        self.current_id = Some(id);
        Ok(())
    }

    /// Root-to-leaf walk along `current_id`. Empty if the session has no
    /// messages yet.
    pub fn get_path(&self) -> Vec<Message> {
        let mut path = Vec::new();
        let mut cursor = self.current_id.clone();
        while let Some(id) = cursor {
            let Some(msg) = self.nodes.get(&id) else { break };
            cursor = msg.parent_id.clone();
            path.push(msg.clone());
        }
        path.reverse();
        path
    }

    /// Full directed tree structure.
    pub fn get_tree(&self) -> HashMap<String, TreeNode> {
        self.nodes
            .iter()
            .map(|(id, msg)| {
                let children = self.children.get(id).cloned().unwrap_or_default();
                (id.clone(), TreeNode { message: msg.clone(), children })
            })
            .collect()
    }

    pub fn get_message(&self, id: &str) -> Option<&Message> {
        self.nodes.get(id)
    }

    /// Insert a node exactly as given, without recomputing `parent_id` or
    /// advancing `current_id`. Used only by [`crate::persist`] to rebuild a
    /// tree from a snapshot.
    pub(crate) fn nodes_insert_raw(&mut self, id: String, message: Message) {
        self.nodes.insert(id, message);
    }

    pub(crate) fn children_push_raw(&mut self, parent: String, child: String) {
        self.children.entry(parent).or_default().push(child);
    }

    pub(crate) fn set_current_id_raw(&mut self, current_id: Option<String>) {
        self.current_id = current_id;
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    pub fn all_messages(&self) -> Vec<&Message> {
        self.nodes.values().collect()
    }

    /// Atomically remove the listed path nodes — which must form a
    /// contiguous prefix of the current path, oldest first — and splice in
    /// `summary_message` as their replacement: the first surviving node's
    /// `parent_id` becomes the summary's id, and the summary is reparented
    /// to whatever the removed prefix's root was parented to. Used by
    /// compaction.
    pub fn replace_path_segment(&mut self, old_ids: &[String], mut summary_message: Message) -> Result<String, TreeError> {
        let path = self.get_path();
        if old_ids.is_empty() || path.len() < old_ids.len() {
            return Err(TreeError::NotAContiguousPrefix);
        }
        if path[..old_ids.len()].iter().map(|m| &m.id).ne(old_ids.iter()) {
            return Err(TreeError::NotAContiguousPrefix);
        }

        let grandparent = path[0].parent_id.clone();
        let surviving_root_id = path.get(old_ids.len()).map(|m| m.id.clone());

        if summary_message.id.is_empty() {
            summary_message.id = Uuid::new_v4().to_string();
        }
        summary_message.parent_id = grandparent.clone();
        let summary_id = summary_message.id.clone();

        for old_id in old_ids {
            self.nodes.remove(old_id);
            self.children.remove(old_id);
        }
        if let Some(gp) = &grandparent {
            if let Some(siblings) = self.children.get_mut(gp) {
                siblings.retain(|c| !old_ids.contains(c));
                siblings.push(summary_id.clone());
            }
        }

        self.nodes.insert(summary_id.clone(), summary_message);

        if let Some(child_id) = surviving_root_id {
            if let Some(child) = self.nodes.get_mut(&child_id) {
                child.parent_id = Some(summary_id.clone());
            }
            self.children.entry(summary_id.clone()).or_default().push(child_id);
        } else {
            // The whole path was replaced; the summary becomes the new leaf.
            self.current_id = Some(summary_id.clone());
        }

        Ok(summary_id)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    fn msg(role: Role, text: &str) -> Message {
        Message::new("", None, role).with_content(text)
    }

    #[test]
    fn append_advances_current_id_and_sets_parent() {
        let mut store = SessionStore::new();
        let a = store.append(msg(Role::User, "hi"));
        let b = store.append(msg(Role::Assistant, "hello"));
        assert_eq!(store.current_id(), Some(b.as_str()));
        assert_eq!(store.get_message(&b).unwrap().parent_id.as_deref(), Some(a.as_str()));
    }

    #[test]
    fn append_many_chains_parents() {
        let mut store = SessionStore::new();
        let ids = store.append_many([msg(Role::User, "a"), msg(Role::Assistant, "b"), msg(Role::User, "c")]);
        assert_eq!(store.get_message(&ids[1]).unwrap().parent_id.as_deref(), Some(ids[0].as_str()));
        assert_eq!(store.get_message(&ids[2]).unwrap().parent_id.as_deref(), Some(ids[1].as_str()));
    }

    #[test]
    fn get_path_walks_root_to_leaf() {
        let mut store = SessionStore::new();
        store.append(msg(Role::User, "1"));
        store.append(msg(Role::Assistant, "2"));
        store.append(msg(Role::User, "3"));
        let path = store.get_path();
        let texts: Vec<_> = path.iter().map(|m| m.content.as_deref().unwrap()).collect();
        assert_eq!(texts, vec!["1", "2", "3"]);
    }

    #[test]
    fn branch_to_unknown_id_errors() {
        let mut store = SessionStore::new();
        assert!(store.branch("nonexistent").is_err());
    }

    #[test]
    fn branch_does_not_delete_nodes() {
        let mut store = SessionStore::new();
        let a = store.append(msg(Role::User, "1"));
        let b = store.append(msg(Role::Assistant, "2"));
        store.branch(a.clone()).unwrap();
        let c = store.append(msg(Role::User, "3-alt"));
        // Both branches remain in the tree.
        assert!(store.get_message(&b).is_some());
        assert!(store.get_message(&c).is_some());
        // The path now follows the new branch.
        let path = store.get_path();
        assert_eq!(path.last().unwrap().id, c);
    }

    #[test]
    fn get_tree_reports_children_in_append_order() {
        let mut store = SessionStore::new();
        let a = store.append(msg(Role::User, "1"));
        let b1 = store.append(msg(Role::Assistant, "2a"));
        store.branch(a.clone()).unwrap();
        let b2 = store.append(msg(Role::Assistant, "2b"));
        let tree = store.get_tree();
        assert_eq!(tree[&a].children, vec![b1, b2]);
    }

    #[test]
    fn replace_path_segment_splices_summary_in_place() {
        let mut store = SessionStore::new();
        let a = store.append(msg(Role::User, "old-1"));
        let b = store.append(msg(Role::Assistant, "old-2"));
        let c = store.append(msg(Role::User, "keep-me"));

        let summary = msg(Role::System, "summary of old-1, old-2");
        let summary_id = store.replace_path_segment(&[a.clone(), b.clone()], summary).unwrap();

        assert!(store.get_message(&a).is_none());
        assert!(store.get_message(&b).is_none());
        assert!(store.get_message(&summary_id).is_some());
        assert_eq!(store.get_message(&c).unwrap().parent_id.as_deref(), Some(summary_id.as_str()));

        let path = store.get_path();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].id, summary_id);
        assert_eq!(path[1].id, c);
    }

    #[test]
    fn replace_path_segment_rejects_non_prefix() {
        let mut store = SessionStore::new();
        let a = store.append(msg(Role::User, "1"));
        let b = store.append(msg(Role::Assistant, "2"));
        // out of order, not a prefix from root
        let result = store.replace_path_segment(&[b, a], msg(Role::System, "bad"));
        assert!(result.is_err());
    }

    #[test]
    fn replace_entire_path_becomes_new_leaf() {
        let mut store = SessionStore::new();
        let a = store.append(msg(Role::User, "1"));
        let b = store.append(msg(Role::Assistant, "2"));
        let summary_id = store.replace_path_segment(&[a, b], msg(Role::System, "all summarized")).unwrap();
        assert_eq!(store.current_id(), Some(summary_id.as_str()));
    }
}
