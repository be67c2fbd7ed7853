//! Drover Release - Release engine and remote operation translation
//!
//! This crate turns deployment intents into wire commands and sequences them
//! across targets according to a rollout strategy:
//!
//! - [`remote::RemoteExecutor`] bridges a typed deployment request to the
//!   wire and back, one path per deploy type (script, container,
//!   Kubernetes, git-pull)
//! - [`engine::ReleaseEngine`] owns the release state machine and drives the
//!   strategy executors in [`strategies`]
//! - [`vars`] is the pure variable-substitution collaborator
//! - [`store`] is the persistence seam; everything is read and written
//!   through the [`store::ReleaseStore`] trait
//!
//! ## Architectural Boundaries
//!
//! - `drover-command` owns: dispatch, tracking, fan-out. This crate consumes
//!   it only through the narrow [`remote::CommandSender`] contract
//! - Strategy executors MUST go through [`context::ReleaseContext`] for
//!   per-target work; they never talk to the wire themselves

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod context;
pub mod engine;
pub mod error;
pub mod remote;
pub mod store;
pub mod strategies;
pub mod vars;

// Re-exports
pub use context::ReleaseContext;
pub use engine::{CreateReleaseRequest, ReleaseEngine};
pub use error::{ReleaseError, Result};
pub use remote::{CommandSender, RemoteExecutor};
pub use store::{InMemoryReleaseStore, ReleaseStore, StoreError};
pub use strategies::{StrategyExecutor, StrategyOutcome};
pub use vars::{VariableContext, VariableResolver};
