//! Prefix tree indexing peers by their [`BindingKey`] bindings
//!
//! This module provides a [`PeerSubscriptionTree`] that organizes subscribed peers as a tree
//! branching on binding key fragments, one level per fragment position
//!
//! For example the following peer bindings
//!
//! | Peer           | Binding key            |
//! |----------------|------------------------|
//! | Peer.0         | france                 |
//! | Peer.1         | france.october.*       |
//! | Peer.2         | *.june.21              |
//! | Peer.3         | belgium.#              |
//!
//! will be organized as such in the tree:
//!
//! ```text
//!    * (0) []
//!        june (1) []
//!            21 (2) [Peer.2]
//!    france (0) [Peer.0]
//!        october (1) []
//!            * (2) [Peer.1]
//!    belgium (0) []
//!        # (1) [Peer.3]
//! ```
//!
//! A lookup walks the tree with the literal parts of a message's [`RoutingContent`], visiting
//! the matching literal child and the `*` child at every level. A `#` node matches any
//! remainder, including the empty one. A literal or `*` terminal only matches when its depth
//! equals the content length. The empty binding key is a terminal attached at the root and
//! matches every routing content.
use std::collections::HashMap;
use std::fmt;

use crate::{BindingKey, BindingKeyFragment, PeerId, RoutingContent};

fn add_peer(peers: &mut Vec<PeerId>, peer: PeerId) {
    if !peers.contains(&peer) {
        peers.push(peer);
    }
}

fn remove_peer(peers: &mut Vec<PeerId>, peer: &PeerId) {
    peers.retain(|p| p != peer);
}

/// A node of the tree, holding the peers whose binding key terminates at this position
#[derive(Debug, Default)]
struct Node {
    /// Special child for the `*` binding key fragment
    star: Option<Box<Node>>,

    /// Special child for the `#` binding key fragment
    sharp: Option<Box<Node>>,

    /// Children keyed by their literal fragment
    children: HashMap<String, Box<Node>>,

    /// Peers whose binding key terminates at this node
    peers: Vec<PeerId>,
}

impl Node {
    /// Walk down the tree following `key`, creating nodes as needed, and return the terminal
    /// node for the key
    fn make_terminal(&mut self, key: &BindingKey, index: usize) -> &mut Node {
        let Some(fragment) = key.fragment(index) else {
            return self;
        };

        let child = match fragment {
            BindingKeyFragment::Star => self.star.get_or_insert_with(Default::default),
            BindingKeyFragment::Sharp => self.sharp.get_or_insert_with(Default::default),
            BindingKeyFragment::Value(value) => self
                .children
                .entry(value.clone())
                .or_insert_with(Default::default),
        };

        child.make_terminal(key, index + 1)
    }

    /// Walk down the tree following `key` and remove `peer` from the terminal node.
    /// Returns `true` if this node became empty and can be pruned from its parent
    fn remove(&mut self, peer: &PeerId, key: &BindingKey, index: usize) -> bool {
        match key.fragment(index) {
            None => remove_peer(&mut self.peers, peer),
            Some(BindingKeyFragment::Star) => {
                Self::remove_from(&mut self.star, peer, key, index);
            }
            Some(BindingKeyFragment::Sharp) => {
                Self::remove_from(&mut self.sharp, peer, key, index);
            }
            Some(BindingKeyFragment::Value(value)) => {
                let prune = self
                    .children
                    .get_mut(value)
                    .map_or(false, |child| child.remove(peer, key, index + 1));
                if prune {
                    self.children.remove(value);
                }
            }
        }

        self.is_empty()
    }

    fn remove_from(slot: &mut Option<Box<Node>>, peer: &PeerId, key: &BindingKey, index: usize) {
        let prune = slot
            .as_mut()
            .map_or(false, |child| child.remove(peer, key, index + 1));
        if prune {
            *slot = None;
        }
    }

    /// Collect the peers consistent with `content` starting at part `index`
    fn accept(&self, content: &RoutingContent, index: usize, collected: &mut Vec<PeerId>) {
        // A sharp node matches any remainder, including the empty one
        if let Some(ref sharp) = self.sharp {
            collected.extend_from_slice(&sharp.peers);
        }

        let Some(part) = content.part(index) else {
            // All parts consumed: terminals at this exact depth match
            collected.extend_from_slice(&self.peers);
            return;
        };

        if let Some(ref star) = self.star {
            star.accept(content, index + 1, collected);
        }

        if let Some(child) = self.children.get(part) {
            child.accept(content, index + 1, collected);
        }
    }

    fn is_empty(&self) -> bool {
        self.peers.is_empty()
            && self.star.is_none()
            && self.sharp.is_none()
            && self.children.is_empty()
    }

    fn fmt_at(&self, f: &mut fmt::Formatter<'_>, fragment: &str, depth: usize) -> fmt::Result {
        const INDENT_LEVEL: usize = 4;

        let indent = depth * INDENT_LEVEL;
        write!(f, "{:indent$}{fragment} ({depth}) [", "")?;
        for (idx, peer) in self.peers.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{peer}")?;
        }
        writeln!(f, "]")?;

        if let Some(ref star) = self.star {
            star.fmt_at(f, "*", depth + 1)?;
        }
        if let Some(ref sharp) = self.sharp {
            sharp.fmt_at(f, "#", depth + 1)?;
        }
        for (fragment, child) in &self.children {
            child.fmt_at(f, fragment, depth + 1)?;
        }

        Ok(())
    }
}

/// Prefix tree of peers based on their [`BindingKey`] bindings
#[derive(Debug, Default)]
pub(crate) struct PeerSubscriptionTree {
    root: Node,

    /// Peers subscribed with the empty binding key. They match every routing content
    empty_peers: Vec<PeerId>,
}

impl PeerSubscriptionTree {
    /// Create a new empty tree
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a peer with a binding [`BindingKey`] to the tree
    pub(crate) fn add(&mut self, peer: PeerId, key: &BindingKey) {
        if key.is_empty() {
            add_peer(&mut self.empty_peers, peer);
        } else {
            let terminal = self.root.make_terminal(key, 0);
            add_peer(&mut terminal.peers, peer);
        }
    }

    /// Remove a peer with a binding [`BindingKey`] from the tree, pruning emptied nodes
    pub(crate) fn remove(&mut self, peer: &PeerId, key: &BindingKey) {
        if key.is_empty() {
            remove_peer(&mut self.empty_peers, peer);
        } else {
            self.root.remove(peer, key, 0);
        }
    }

    /// Get the de-duplicated list of peers whose binding matches `content`
    pub(crate) fn matching_peers(&self, content: &RoutingContent) -> Vec<PeerId> {
        let mut collected = self.empty_peers.clone();
        self.root.accept(content, 0, &mut collected);

        // A peer subscribed through both a literal and a wildcard path shows up twice
        collected.sort();
        collected.dedup();
        collected
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.empty_peers.is_empty() && self.root.is_empty()
    }
}

impl fmt::Display for PeerSubscriptionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.empty_peers.is_empty() {
            write!(f, "<empty> [")?;
            for (idx, peer) in self.empty_peers.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{peer}")?;
            }
            writeln!(f, "]")?;
        }

        if let Some(ref star) = self.root.star {
            star.fmt_at(f, "*", 0)?;
        }
        if let Some(ref sharp) = self.root.sharp {
            sharp.fmt_at(f, "#", 0)?;
        }
        for (fragment, child) in &self.root.children {
            child.fmt_at(f, fragment, 0)?;
        }

        Ok(())
    }
}
