use uuid::Uuid;

use crate::{Time, UserRef, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct PostId(pub Uuid);

impl PostId {
    pub fn stub() -> PostId {
        PostId(STUB_UUID)
    }
}

/// Wire-level snapshot of a post's social state.
///
/// Comments travel separately: the initial load of a viewed post returns
/// `(Post, Vec<Comment>)`.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Post {
    pub id: PostId,
    pub author: UserRef,
    pub title: String,
    pub body: String,
    pub like_count: u32,
    pub likers: Vec<UserRef>,
    pub comment_count: u32,
    pub created_at: Time,
}
