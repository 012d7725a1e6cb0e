//! Message model for the Agent Bus
//!
//! Agents never share memory. They cooperate by exchanging typed
//! envelopes over a publish/subscribe bus. Every envelope carries a
//! common [`MessageHeader`] and exactly one variant body.
//!
//! # Variants
//!
//! - **Request**: ask another agent to perform an action
//! - **Response**: answer a Request, linked through `correlation_id`
//! - **Event**: fire-and-forget broadcast, no reply expected
//! - **Escalation**: automatic recovery failed, a human may be needed
//!
//! # Construction Rules
//!
//! 1. Ids are generated at creation and never change.
//! 2. Required fields are never defaulted; a missing one is a
//!    [`MessageError::Malformed`] at build time.
//! 3. Only ttl, response timeout, priority, severity and retry counts
//!    have documented defaults.
//! 4. A Response built from a Request inherits its trace and points
//!    its `parent_span_id` at the Request's span.

#![deny(unsafe_code)]

mod envelope;
mod errors;
mod header;
pub mod topics;
mod value;
mod variants;

pub use envelope::*;
pub use errors::*;
pub use header::*;
pub use value::*;
pub use variants::*;
