//! Worker node identity as seen by the cluster client (spec §3 "Worker node
//! identity"). A node only participates in scaling decisions when its name
//! matches the configured owned pattern.

use serde::{Deserialize, Serialize};

/// A worker node known to the cluster API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedNode {
    pub name: String,
    pub ready: bool,
}

impl OwnedNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ready: false,
        }
    }
}
