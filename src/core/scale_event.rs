//! `ScaleEvent`, the unit of work flowing through the work queue (spec §3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleEventKind {
    Create,
    Destroy,
}

impl ScaleEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleEventKind::Create => "create",
            ScaleEventKind::Destroy => "destroy",
        }
    }
}

/// A single CREATE or DESTROY action, published to the work queue by the
/// control loop and consumed by a pipeline worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleEvent {
    /// Stable identifier: the new or target node name.
    pub id: String,
    pub kind: ScaleEventKind,
    /// For CREATE, the name assigned pre-flight; for DESTROY, the victim.
    pub node_name: String,
    /// CREATE only; assigned by placement (§4.2).
    pub target_host: Option<String>,
}

impl ScaleEvent {
    pub fn create(node_name: impl Into<String>, target_host: impl Into<String>) -> Self {
        let node_name = node_name.into();
        Self {
            id: node_name.clone(),
            kind: ScaleEventKind::Create,
            node_name,
            target_host: Some(target_host.into()),
        }
    }

    pub fn destroy(node_name: impl Into<String>) -> Self {
        let node_name = node_name.into();
        Self {
            id: node_name.clone(),
            kind: ScaleEventKind::Destroy,
            node_name,
            target_host: None,
        }
    }
}
