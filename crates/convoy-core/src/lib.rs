//! Core error types for the Convoy mission orchestrator.
//!
//! This crate holds the error taxonomy shared by every Convoy crate, plus the
//! serializable error detail that gets recorded on tasks, missions, and
//! mission events.
//!
//! # Main types
//!
//! - [`ConvoyError`]: Unified error enum for scheduling, pool, planning and provider failures.
//! - [`ConvoyResult`]: Convenience alias for `Result<T, ConvoyError>`.
//! - [`ErrorKind`]: Closed classification of failures, used for retry decisions and observability.
//! - [`TaskError`]: Structured `{ kind, message }` detail stored on entities.

/// Error enum, error kinds and structured error detail.
pub mod error;

pub use error::{ConvoyError, ConvoyResult, ErrorKind, TaskError};
