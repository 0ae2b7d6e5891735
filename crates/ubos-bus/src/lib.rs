//! In-process message bus and the adapter that puts agents on it.
//!
//! Topics are matched exactly; there are no wildcards. Publishing awaits
//! every subscriber in order, so a publish returns only after all handlers
//! ran. Requests carry a correlation id that [`MessageBus::reply`] uses to
//! wake the waiting caller.
//!
//! # Main types
//!
//! - [`MessageBus`] — Subscribe, publish, request and reply.
//! - [`Envelope`] / [`MessageHeader`] — The message shape on every topic.
//! - [`TaskAssignment`] / [`ResultBody`] — Bodies of task and result messages.
//! - [`AgentAdapter`] — Runs an agent for each task message it receives.

/// Agent adapter.
pub mod adapter;
/// The bus.
#[allow(missing_docs)]
pub mod bus;
/// Message shapes and topic names.
#[allow(missing_docs)]
pub mod envelope;

pub use adapter::AgentAdapter;
pub use bus::{
    handler_fn, MessageBus, MessageHandler, Subscription, WeakMessageBus, DEFAULT_REQUEST_TIMEOUT,
};
pub use envelope::{topics, Envelope, MessageHeader, ResultBody, TaskAssignment};
