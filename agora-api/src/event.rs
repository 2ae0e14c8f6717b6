use uuid::Uuid;

use crate::{Comment, CommentId, Post, PostId, UserId, UserRef};

/// Messages flowing from the channel to a subscriber
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum FeedMessage {
    Pong,
    Event(FeedEvent),
}

/// Authoritative events pushed to every viewer of a post's room.
///
/// Delivery is at-least-once and in-order per room: consumers must absorb
/// duplicates but may rely on the server commit order.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum FeedEvent {
    NewComment {
        post_id: PostId,
        comment: Comment,
        parent_comment_id: Option<CommentId>,
    },
    DeletedComment {
        post_id: PostId,
        comment_id: CommentId,
        parent_comment_id: Option<CommentId>,
    },
    UpdatedComment {
        post_id: PostId,
        comment: Comment,
    },
    LikeUpdate {
        post_id: PostId,
        target: Uuid,
        target_type: LikeTarget,
        like_count: u32,
        user_id: UserId,
        action: LikeAction,
        liked_user: Option<UserRef>,
    },
    UpdatedPost {
        post: Post,
    },
}

impl FeedEvent {
    /// Room routing key
    pub fn post_id(&self) -> PostId {
        match self {
            FeedEvent::NewComment { post_id, .. } => *post_id,
            FeedEvent::DeletedComment { post_id, .. } => *post_id,
            FeedEvent::UpdatedComment { post_id, .. } => *post_id,
            FeedEvent::LikeUpdate { post_id, .. } => *post_id,
            FeedEvent::UpdatedPost { post } => post.id,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum LikeTarget {
    Post,
    Comment,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum LikeAction {
    Liked,
    Unliked,
}
