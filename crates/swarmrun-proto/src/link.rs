//! Transport abstraction between a worker and the queen.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{Message, ProtocolError};

/// Errors raised by a [`QueenLink`].
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("link closed")]
    Closed,
}

/// Request/reply channel to the queen.
///
/// Every message a worker sends gets exactly one reply carrying the same
/// correlation id. Implementations exist for HTTP and for an in-process
/// queen.
#[async_trait]
pub trait QueenLink: Send + Sync {
    async fn exchange(&self, message: Message) -> Result<Message, LinkError>;
}

#[async_trait]
impl<T: QueenLink + ?Sized> QueenLink for Arc<T> {
    async fn exchange(&self, message: Message) -> Result<Message, LinkError> {
        (**self).exchange(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Ack, Body, Heartbeat};

    struct Echo;

    #[async_trait]
    impl QueenLink for Echo {
        async fn exchange(&self, message: Message) -> Result<Message, LinkError> {
            Ok(message.reply("queen", Body::Ack(Ack::accepted())))
        }
    }

    #[tokio::test]
    async fn test_shared_link_forwards_exchange() {
        let shared = Arc::new(Echo);
        let dynamic: Arc<dyn QueenLink> = shared.clone();

        for link in [&shared as &dyn QueenLink, &dynamic as &dyn QueenLink] {
            let request = Message::request("w1", Body::Heartbeat(Heartbeat::default()));
            let reply = link.exchange(request.clone()).await.unwrap();
            assert_eq!(reply.correlation_id(), request.correlation_id());
            assert_eq!(reply.sender(), "queen");
            assert_eq!(reply.body(), &Body::Ack(Ack::accepted()));
        }
    }
}
