use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

mod action;
pub use action::{ActionClient, ChannelConnection, ChannelTransport, Outcome, Request};

mod comment;
pub use comment::{Comment, CommentId};

mod error;
pub use error::Error;

mod event;
pub use event::{FeedEvent, FeedMessage, LikeAction, LikeTarget};

mod post;
pub use post::{Post, PostId};

mod user;
pub use user::{UserId, UserRef};
