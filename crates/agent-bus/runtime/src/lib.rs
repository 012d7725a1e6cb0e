//! Agent Bus runtime
//!
//! [`AgentBus`] sits between agents and a [`PubSubTransport`]. It
//! validates and serializes outgoing messages, dispatches incoming ones
//! to the handlers registered for their topic, and turns the
//! asynchronous pub/sub exchange into a request/response call.
//!
//! # Key Concepts
//!
//! - **Handler**: An async callback registered for a topic. Every
//!   handler of a topic sees every message delivered on it.
//! - **Pending waiter**: A one-shot slot keyed by a Request's message id,
//!   resolved by the Response whose `correlation_id` matches.
//! - **Persistence sink**: Optional audit log; failures to write it are
//!   logged and never affect delivery.
//!
//! # Design Principles
//!
//! 1. `request()` always resolves: with the matching Response, or with
//!    a synthetic failure when the wait times out.
//! 2. A waiter is resolved at most once. Whoever removes it from the
//!    pending table first (listener or timed-out requester) wins.
//! 3. A failing handler never stops the listener or other handlers.
//!
//! [`PubSubTransport`]: agent_bus_transport::PubSubTransport

#![deny(unsafe_code)]

mod bus;
mod config;
mod error;
mod handler;
mod stats;

pub use bus::*;
pub use config::*;
pub use error::*;
pub use handler::*;
pub use stats::*;
