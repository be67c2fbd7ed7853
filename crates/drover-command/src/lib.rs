//! Drover Command - Asynchronous command dispatch and tracking
//!
//! The [`CommandTracker`] sends units of work to named remote agents through
//! a pluggable [`Transport`] and reconciles their eventual acknowledgments.
//! Completion is observed by lookup or by awaiting the tracker, never from
//! the dispatch call itself.
//!
//! ## Architectural Boundaries
//!
//! - The wire transport (delivery, framing, TLS) is a collaborator consumed
//!   only through the "send and obtain a promise" contract in [`transport`]
//! - One waiter task per command consumes its [`Promise`] exactly once and
//!   maps the ack onto a terminal command status
//! - Fan-out to many targets is a cancellable task whose counted outcomes
//!   always sum to the target count
//!
//! Cancellation is cooperative and local: an operation already handed to the
//! transport is not recalled, it is only marked cancelled in the registry.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod multicast;
pub mod tracker;
pub mod transport;

// Re-exports
pub use error::{CommandError, Result};
pub use multicast::{MulticastResponse, TargetCommandResult, TaskInfo, TaskStatus};
pub use tracker::{CommandTracker, WaitOutcome};
pub use transport::{
    AckStatus, CommandAck, Promise, PromiseResolver, Transport, TransportError, WireMessage,
};
