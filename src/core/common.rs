//! Shared primitives: the owned-node naming scheme and the resource types
//! used throughout accounting and placement.

use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

/// Bytes per MiB, used to convert `node_memory_mib` into bytes for
/// comparison against [`AllocatedResources`] and [`UnschedulableDemand`],
/// both of which carry memory in bytes.
pub const MIB: u64 = 1 << 20;

/// Builds the exact owned-name regex for a given prefix:
/// `^<prefix>-[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$`
///
/// Implementers must match this exactly; anything looser risks deleting
/// nodes the system does not own.
pub fn owned_name_regex(prefix: &str) -> Regex {
    let pattern = format!(
        "^{}-[0-9a-f]{{8}}-[0-9a-f]{{4}}-[0-9a-f]{{4}}-[0-9a-f]{{4}}-[0-9a-f]{{12}}$",
        regex::escape(prefix)
    );
    Regex::new(&pattern).expect("owned-name pattern is always valid regex")
}

lazy_static! {
    /// Loose v4-uuid matcher, used only to validate freshly generated names
    /// before they are handed to a client; the authoritative check against
    /// a configured prefix always goes through [`owned_name_regex`].
    static ref UUID_V4_SHAPE: Regex =
        Regex::new("^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$").unwrap();
}

/// Generates a fresh owned node name of the form `<prefix>-<uuid-v4>`.
pub fn new_owned_name(prefix: &str) -> String {
    let id = Uuid::new_v4();
    debug_assert!(UUID_V4_SHAPE.is_match(&id.to_string()));
    format!("{}-{}", prefix, id)
}

/// Per-node resource footprint, either a worker's fixed capacity or a
/// pod's accounted allocation. CPU is fractional cores, memory is bytes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Resources {
    pub cpu: f64,
    pub memory_bytes: u64,
}

impl Resources {
    pub fn new(cpu: f64, memory_bytes: u64) -> Self {
        Self { cpu, memory_bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_name_regex_accepts_generated_names() {
        let re = owned_name_regex("worker");
        let name = new_owned_name("worker");
        assert!(re.is_match(&name), "{name} did not match");
    }

    #[test]
    fn owned_name_regex_rejects_non_owned_names() {
        let re = owned_name_regex("worker");
        assert!(!re.is_match("worker-not-a-uuid"));
        assert!(!re.is_match("other-550e8400-e29b-41d4-a716-446655440000"));
        assert!(!re.is_match("worker-550e8400-e29b-41d4-a716-44665544000")); // short
        assert!(!re.is_match("worker-550E8400-E29B-41D4-A716-446655440000")); // uppercase
    }

    #[test]
    fn owned_name_regex_escapes_prefix() {
        // a prefix containing regex metacharacters must not let arbitrary
        // suffixes through
        let re = owned_name_regex("wk.*");
        assert!(!re.is_match("wkXXX-550e8400-e29b-41d4-a716-446655440000"));
        assert!(re.is_match("wk.*-550e8400-e29b-41d4-a716-446655440000"));
    }
}
