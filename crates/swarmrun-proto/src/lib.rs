//! Protocol envelope and codec for SwarmRun.
//!
//! This crate contains:
//! - The [`Message`] envelope and its typed [`Body`]
//! - The JSON wire codec ([`encode`] / [`decode`]) with version checks
//! - The [`QueenLink`] transport abstraction used by workers

pub mod codec;
pub mod error;
pub mod link;
pub mod message;
pub mod payload;

pub use codec::{decode, encode};
pub use error::ProtocolError;
pub use link::{LinkError, QueenLink};
pub use message::{Body, Message, MessageType, PROTOCOL_VERSION};
pub use payload::{
    Ack, AckStatus, Assignment, Cancel, ClaimGrant, ClaimRequest, Deregister, Heartbeat,
    RegisterWorker, TaskResult, TaskStarted,
};
