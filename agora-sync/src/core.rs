use agora_api::{Comment, Post, Request, UserId, UserRef};

use crate::{
    error::SyncError,
    pending::{OpId, PendingSet},
    store::PostAggregate,
};

/// A request the driver must issue to the authoritative service on behalf
/// of a just-recorded pending operation
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dispatch {
    pub op: OpId,
    pub issued_by: UserId,
    pub request: Request,
}

/// What applying one inbound channel event did
#[derive(Debug, Default, Eq, PartialEq)]
pub struct EventOutcome {
    /// Pending operation this event confirmed, if any
    pub retired: Option<OpId>,
    /// Whether the aggregate changed (snapshot consumers should re-render)
    pub changed: bool,
}

/// Final disposition of an authoritative response
#[derive(Debug, Eq, PartialEq)]
pub enum ResponseOutcome {
    /// Pending operation confirmed; the optimistic state stands
    Confirmed,
    /// A channel event already confirmed this operation; nothing to do
    AlreadyApplied,
    /// The request failed and the optimistic mutation was reverted
    RolledBack(SyncError),
}

/// Single writer for one post's aggregate.
///
/// Every mutation, locally-initiated or inbound from the channel, flows
/// through this state machine one message at a time; it never blocks and
/// performs no I/O, so the reconciliation logic is testable on its own.
pub struct SyncCore {
    pub(crate) store: PostAggregate,
    pub(crate) pending: PendingSet,
    pub(crate) viewer: Option<UserRef>,
}

impl SyncCore {
    pub fn new(post: Post, comments: Vec<Comment>, viewer: Option<UserRef>) -> SyncCore {
        SyncCore {
            store: PostAggregate::new(post, comments),
            pending: PendingSet::new(),
            viewer,
        }
    }

    pub fn store(&self) -> &PostAggregate {
        &self.store
    }

    pub fn pending_ops(&self) -> usize {
        self.pending.len()
    }

    pub fn is_liked_by_viewer(&self) -> bool {
        match &self.viewer {
            Some(viewer) => self.store.is_liked_by(&viewer.id),
            None => false,
        }
    }

    pub(crate) fn viewer(&self) -> Result<UserRef, SyncError> {
        self.viewer.clone().ok_or(SyncError::NotLoggedIn)
    }
}
