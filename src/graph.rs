pub mod dag;
pub mod layout;
pub mod store;

use crate::scheduler::wire::RunStatus;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub status: RunStatus,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub vx: f64,
    #[serde(default)]
    pub vy: f64,
    #[serde(default)]
    pub fixed: bool,
}

impl GraphNode {
    pub fn new(id: &str, status: RunStatus) -> Self {
        GraphNode {
            id: id.to_string(),
            status,
            x: 0.0,
            y: 0.0,
            vx: 0.0,
            vy: 0.0,
            fixed: false,
        }
    }
}

/// Unordered endpoint pair. Two links over the same pair are the same link.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkKey {
    pub low: String,
    pub high: String,
}

impl LinkKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            LinkKey {
                low: a.to_string(),
                high: b.to_string(),
            }
        } else {
            LinkKey {
                low: b.to_string(),
                high: a.to_string(),
            }
        }
    }

    pub fn touches(&self, id: &str) -> bool {
        self.low == id || self.high == id
    }
}

/// Edge between two nodes. `right` marks a dependency source -> target and
/// `left` marks target -> source; the flags are independent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GraphLink {
    pub source: String,
    pub target: String,
    pub left: bool,
    pub right: bool,
}

impl GraphLink {
    pub fn dependency(from: &str, to: &str) -> Self {
        GraphLink {
            source: from.to_string(),
            target: to.to_string(),
            left: false,
            right: true,
        }
    }

    pub fn key(&self) -> LinkKey {
        LinkKey::new(&self.source, &self.target)
    }

    pub fn touches(&self, id: &str) -> bool {
        self.source == id || self.target == id
    }

    pub fn connects(&self, a: &str, b: &str) -> bool {
        (self.source == a && self.target == b) || (self.source == b && self.target == a)
    }

    pub fn has_direction(&self, from: &str, to: &str) -> bool {
        (self.right && self.source == from && self.target == to)
            || (self.left && self.target == from && self.source == to)
    }

    /// Marks `from -> to` on this link. The pair must match the link.
    pub fn set_direction(&mut self, from: &str, to: &str) {
        if self.source == from && self.target == to {
            self.right = true;
        } else if self.target == from && self.source == to {
            self.left = true;
        }
    }

    pub fn clear_direction(&mut self, from: &str, to: &str) {
        if self.source == from && self.target == to {
            self.right = false;
        } else if self.target == from && self.source == to {
            self.left = false;
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.left && !self.right
    }

    /// The dependency edges this link stands for, as (from, to).
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges = Vec::with_capacity(2);
        if self.right {
            edges.push((self.source.clone(), self.target.clone()));
        }
        if self.left {
            edges.push((self.target.clone(), self.source.clone()));
        }
        edges
    }

    pub fn rename_endpoint(&mut self, old_id: &str, new_id: &str) {
        if self.source == old_id {
            self.source = new_id.to_string();
        }
        if self.target == old_id {
            self.target = new_id.to_string();
        }
    }
}
