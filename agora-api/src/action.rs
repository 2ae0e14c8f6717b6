use async_trait::async_trait;
use uuid::Uuid;

use crate::{Error, FeedMessage, LikeAction, PostId, UserId};

/// A request to the authoritative action service
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum Request {
    ToggleLike { post: PostId },
    DeleteEntity { id: Uuid },
}

/// Successful outcome of a [`Request`]
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum Outcome {
    Like { like_count: u32, action: LikeAction },
    Deleted,
}

/// The authoritative action service boundary.
///
/// Any non-success result is treated uniformly by the caller as "roll the
/// optimistic mutation back".
#[async_trait]
pub trait ActionClient: Send + Sync {
    async fn submit(&self, from: UserId, request: Request) -> Result<Outcome, Error>;
}

/// Factory for channel connections; the subscription manager reconnects
/// through this after a connection loss.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ChannelConnection>, Error>;
}

/// One live connection to the pub/sub channel, multiplexing any number of
/// room subscriptions.
#[async_trait]
pub trait ChannelConnection: Send {
    async fn subscribe(&mut self, room: PostId) -> Result<(), Error>;
    async fn unsubscribe(&mut self, room: PostId) -> Result<(), Error>;
    async fn ping(&mut self) -> Result<(), Error>;

    /// Next inbound message; `None` means the connection was lost
    async fn next_message(&mut self) -> Option<FeedMessage>;
}
