//! Worker errors.

use thiserror::Error;

use swarmrun_proto::{AckStatus, LinkError};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("queen rejected request ({}): {detail}", status.as_str())]
    Rejected { status: AckStatus, detail: String },

    #[error("unexpected reply: expected {expected}, got {got}")]
    UnexpectedReply { expected: String, got: String },
}
