//! Path derivation over a conversation's message tree.
//!
//! Messages are an arena keyed by id; edges are the `parent` and `children`
//! id fields. Nothing here touches storage.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::db::{Message, MessageId};

/// Leaf id reported for a branch that cannot be resolved.
pub const NOT_FOUND: MessageId = -1;

/// Sibling navigation data for one message of a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub message_id: MessageId,
    /// The parent's children, in creation order.
    pub siblings: Vec<MessageId>,
    /// Position of `message_id` within `siblings`.
    pub index: usize,
    /// Tip of each sibling's most recent branch, [`NOT_FOUND`] if unresolvable.
    pub sibling_leaves: Vec<MessageId>,
}

impl BranchInfo {
    pub fn has_siblings(&self) -> bool {
        self.siblings.len() > 1
    }
}

/// Read-only view of one conversation's messages.
pub struct ConversationTree<'a> {
    nodes: HashMap<MessageId, &'a Message>,
    root: Option<&'a Message>,
}

impl<'a> ConversationTree<'a> {
    pub fn new(messages: &'a [Message]) -> Self {
        let nodes: HashMap<MessageId, &Message> = messages.iter().map(|m| (m.id, m)).collect();
        let root = messages.iter().find(|m| m.is_root());
        Self { nodes, root }
    }

    pub fn root(&self) -> Option<&'a Message> {
        self.root
    }

    pub fn get(&self, id: MessageId) -> Option<&'a Message> {
        self.nodes.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Messages from the root (exclusive) down to `leaf` (inclusive).
    ///
    /// A leaf that is absent, unknown, or cut off from the root by a missing
    /// ancestor yields the default path instead.
    pub fn path_to(&self, leaf: Option<MessageId>) -> Vec<&'a Message> {
        leaf.and_then(|id| self.ancestry(id))
            .unwrap_or_else(|| self.default_path())
    }

    /// Follow the last child from the root until a leaf is reached.
    pub fn default_path(&self) -> Vec<&'a Message> {
        let mut path = Vec::new();
        let Some(root) = self.root else {
            return path;
        };

        let mut seen = HashSet::from([root.id]);
        let mut node = root;
        while let Some(next) = node.children.last().and_then(|id| self.get(*id)) {
            if !seen.insert(next.id) {
                break;
            }
            path.push(next);
            node = next;
        }
        path
    }

    /// The tip of the default path, or the root for an empty conversation.
    pub fn default_leaf(&self) -> Option<MessageId> {
        self.root.map(|root| self.leaf_of(root.id))
    }

    /// Whether `id` is connected to the root through stored ancestors.
    pub fn is_reachable(&self, id: MessageId) -> bool {
        match self.root {
            Some(root) if root.id == id => true,
            _ => self.ancestry(id).is_some(),
        }
    }

    /// Deepest last-child descendant of `id`, or [`NOT_FOUND`].
    pub fn leaf_of(&self, id: MessageId) -> MessageId {
        let Some(mut node) = self.get(id) else {
            return NOT_FOUND;
        };

        let mut seen = HashSet::from([node.id]);
        while let Some(&child) = node.children.last() {
            match self.get(child) {
                Some(next) if seen.insert(next.id) => node = next,
                _ => return NOT_FOUND,
            }
        }
        node.id
    }

    /// Sibling info for each message of `path`.
    pub fn branches(&self, path: &[&Message]) -> Vec<BranchInfo> {
        path.iter()
            .map(|message| {
                let siblings = self
                    .get(message.parent)
                    .map(|parent| parent.children.clone())
                    .unwrap_or_else(|| vec![message.id]);
                let index = siblings
                    .iter()
                    .position(|id| *id == message.id)
                    .unwrap_or(0);
                let sibling_leaves = siblings.iter().map(|id| self.leaf_of(*id)).collect();
                BranchInfo {
                    message_id: message.id,
                    siblings,
                    index,
                    sibling_leaves,
                }
            })
            .collect()
    }

    // Walk up from `id`; None unless the walk ends at the root.
    fn ancestry(&self, id: MessageId) -> Option<Vec<&'a Message>> {
        let root = self.root?;
        let mut path = Vec::new();
        let mut seen = HashSet::new();
        let mut node = self.get(id)?;

        while node.id != root.id {
            if !seen.insert(node.id) {
                return None;
            }
            path.push(node);
            node = self.get(node.parent)?;
        }

        path.reverse();
        Some(path)
    }
}
