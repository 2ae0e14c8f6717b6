use uuid::Uuid;

use crate::STUB_UUID;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

/// A user as referenced by posts, comments and like updates
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct UserRef {
    pub id: UserId,
    pub name: String,
}

impl UserRef {
    /// Placeholder for events that carry only a user id
    pub fn unknown(id: UserId) -> UserRef {
        UserRef {
            id,
            name: String::new(),
        }
    }
}
