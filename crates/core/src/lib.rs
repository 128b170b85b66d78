//! netq-core: Core library for the netq task queue
//!
//! This crate provides:
//! - Mutual-exclusion targets and their deterministic constructors
//! - Task identifiers and statuses
//! - Typed task payloads and the pluggable lock-target resolver
//! - Change events published by the store

pub mod event;
pub mod payload;
pub mod target;
pub mod task;

// Re-exports
pub use event::QueueEvent;
pub use payload::{
    PeeringConnection, PeeringRequest, ResolveError, StateError, StateReader, SubnetType,
    TaskPayload, UpdateLogging, UpdateNetworking,
};
pub use target::Target;
pub use task::{TaskId, TaskStatus};
