use agora_api::{UserId, UserRef, Uuid};

use crate::tree::RemovedComment;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct OpId(pub Uuid);

impl OpId {
    fn fresh() -> OpId {
        OpId(Uuid::new_v4())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PendingKind {
    Like,
    Unlike,
    DeleteComment,
}

/// Snapshot sufficient to reverse the optimistic apply: each pending
/// operation carries its own inverse.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PriorState {
    Like {
        was_liked: bool,
        like_count: u32,
        /// The liker-set entry removed by an optimistic unlike, if any
        member: Option<UserRef>,
    },
    Comment {
        removed: RemovedComment,
        comment_count: u32,
    },
}

/// A locally-applied mutation awaiting its authoritative confirmation
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingOp {
    pub id: OpId,
    pub kind: PendingKind,
    pub target: Uuid,
    pub issued_by: UserId,
    pub prior: PriorState,
}

/// Outstanding pending operations for one post, in issue order
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PendingSet(Vec<PendingOp>);

impl PendingSet {
    pub fn new() -> PendingSet {
        PendingSet::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn record(
        &mut self,
        kind: PendingKind,
        target: Uuid,
        issued_by: UserId,
        prior: PriorState,
    ) -> OpId {
        let id = OpId::fresh();
        self.0.push(PendingOp {
            id,
            kind,
            target,
            issued_by,
            prior,
        });
        id
    }

    /// Retire by op id (the request/response confirmation path)
    pub fn take(&mut self, id: OpId) -> Option<PendingOp> {
        let i = self.0.iter().position(|op| op.id == id)?;
        Some(self.0.remove(i))
    }

    /// Retire the oldest entry matching an inbound authoritative event
    /// (the channel confirmation path)
    pub fn retire_matching(
        &mut self,
        kind: PendingKind,
        target: Uuid,
        issued_by: UserId,
    ) -> Option<PendingOp> {
        let i = self
            .0
            .iter()
            .position(|op| op.kind == kind && op.target == target && op.issued_by == issued_by)?;
        Some(self.0.remove(i))
    }

    /// Is the post's like state currently shadowed by an optimistic toggle?
    pub fn shadows_likes(&self) -> bool {
        self.0
            .iter()
            .any(|op| matches!(op.kind, PendingKind::Like | PendingKind::Unlike))
    }

    /// Is the comment collection currently shadowed by an optimistic delete?
    pub fn shadows_comments(&self) -> bool {
        self.0
            .iter()
            .any(|op| matches!(op.kind, PendingKind::DeleteComment))
    }
}
