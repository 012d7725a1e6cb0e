//! Agent Bus persistence sink.
//!
//! The bus and the orchestrator write through one [`PersistenceSink`]:
//! - an audit log of every message, keyed by message id
//! - workflow definitions
//! - workflow executions and their per-step records
//! - escalations raised by the orchestrator
//!
//! Design stance:
//! - Message logging is best-effort; callers log and swallow failures.
//! - Execution and step records are the audit trail of a run, so
//!   failing to create them is surfaced to the caller.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod model;
mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use model::{EscalationRecord, EscalationStatus, MessageRecord, MessageStatus};
pub use traits::PersistenceSink;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
