//! In-memory fakes for the client traits, used by control-loop and pipeline
//! tests so they never need a real hypervisor or cluster API.

pub mod fakes;
