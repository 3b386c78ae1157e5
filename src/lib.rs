//! Reliable message delivery over a websocket pubsub connection.
//!
//! The client sends application events and learns, per event, whether the
//! server accepted it; acknowledges sequenced server data so a dropped
//! transport can be resumed without redelivery; and recovers pending sends
//! when the transport disappears mid-flight.
//!
//! COMPONENTS
//! ==========
//! - [`ReliableClient`]: connection lifecycle and inbound dispatch.
//! - [`AckRegistry`]: pending sends, each resolved exactly once.
//! - [`SequenceTracker`]: the resumption checkpoint.
//! - [`reconnect`]: which closes resume and how resume handshakes look.
//!
//! Wire formats live in the `frames` crate; a [`frames::Codec`] picks the
//! protocol variant the client speaks.

pub mod client;
pub mod config;
pub mod error;
pub mod negotiate;
pub mod reconnect;
pub mod registry;
pub mod sequence;
pub mod session;
mod transport;

pub use client::{ClientEvent, ReliableClient};
pub use config::{AckDeadline, ClientConfig};
pub use error::{AckError, Acked, ClientError};
pub use negotiate::{HttpNegotiator, Negotiated, NegotiateError, Negotiator, StaticNegotiator};
pub use registry::{AckFuture, AckRegistry};
pub use sequence::{Observation, SequenceTracker};
pub use session::{ConnectionStatus, ResumeInfo};
