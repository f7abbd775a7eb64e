//! Work queue (spec §4.3, C3): the trait contract plus an in-memory fake
//! and a real AMQP-backed implementation.

pub mod amqp;
pub mod in_memory;
pub mod interface;

pub use interface::{AckHandle, AckToken, QueueDepth, WorkQueue};
