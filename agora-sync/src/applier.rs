use agora_api::{CommentId, Error as ApiError, Outcome, Request, UserRef};

use crate::{
    core::{Dispatch, ResponseOutcome, SyncCore},
    error::SyncError,
    pending::{OpId, PendingKind, PendingOp, PriorState},
};

impl SyncCore {
    /// Optimistically flip the viewer's like state and hand back the
    /// authoritative request to dispatch.
    ///
    /// The store reflects the flip before any network round-trip; the
    /// recorded pending operation carries the pre-flip state for rollback.
    pub fn toggle_like(&mut self) -> Result<Dispatch, SyncError> {
        let viewer = self.viewer()?;
        let was_liked = self.store.is_liked_by(&viewer.id);
        let prior = PriorState::Like {
            was_liked,
            like_count: self.store.like_count,
            member: self.store.likers.get(&viewer.id).cloned(),
        };
        if was_liked {
            self.store.likers.remove(&viewer.id);
            if self.store.like_count == 0 {
                tracing::warn!(post = ?self.store.id, "unliking a post with a zero like count");
            }
            self.store.like_count = self.store.like_count.saturating_sub(1);
        } else {
            self.store.likers.insert(viewer.id, viewer.clone());
            self.store.like_count += 1;
        }
        let kind = if was_liked {
            PendingKind::Unlike
        } else {
            PendingKind::Like
        };
        let op = self
            .pending
            .record(kind, self.store.id.0, viewer.id, prior);
        Ok(Dispatch {
            op,
            issued_by: viewer.id,
            request: Request::ToggleLike {
                post: self.store.id,
            },
        })
    }

    /// Optimistically remove a comment (or reply) and hand back the
    /// authoritative delete to dispatch.
    ///
    /// Destructive: the caller must have collected explicit confirmation
    /// from the viewer before the removal is applied.
    pub fn delete_comment(
        &mut self,
        id: CommentId,
        confirmed: bool,
    ) -> Result<Dispatch, SyncError> {
        let viewer = self.viewer()?;
        if !confirmed {
            return Err(SyncError::ConfirmationRequired);
        }
        let removed = self
            .store
            .comments
            .remove(id)
            .ok_or(SyncError::Api(ApiError::NotFound(id.0)))?;
        let prior = PriorState::Comment {
            comment_count: self.store.comment_count,
            removed: removed.clone(),
        };
        let subtree = removed.node.subtree_len();
        if self.store.comment_count < subtree {
            tracing::warn!(
                have = self.store.comment_count,
                removing = subtree,
                "comment count would go negative, clamping"
            );
        }
        self.store.comment_count = self.store.comment_count.saturating_sub(subtree);
        let op = self
            .pending
            .record(PendingKind::DeleteComment, id.0, viewer.id, prior);
        Ok(Dispatch {
            op,
            issued_by: viewer.id,
            request: Request::DeleteEntity { id: id.0 },
        })
    }

    /// Feed the authoritative response for a dispatched request back in.
    ///
    /// Whichever authoritative signal arrives first wins: if a channel
    /// event already retired the operation, the response is treated as
    /// already-applied and the store is left alone.
    pub fn handle_response(
        &mut self,
        op: OpId,
        result: Result<Outcome, SyncError>,
    ) -> ResponseOutcome {
        let Some(pending) = self.pending.take(op) else {
            tracing::debug!(?op, "response for an already-retired operation");
            return ResponseOutcome::AlreadyApplied;
        };
        match result {
            Ok(outcome) => {
                // The optimistic state already matches the intended result;
                // only a disagreeing counter echo is adopted, the server is
                // final arbiter of the numeric count.
                if let Outcome::Like { like_count, .. } = outcome {
                    if like_count != self.store.like_count {
                        tracing::debug!(
                            local = self.store.like_count,
                            server = like_count,
                            "adopting the server's like count from the response echo"
                        );
                        self.store.like_count = like_count;
                    }
                }
                self.store.enforce_invariants();
                ResponseOutcome::Confirmed
            }
            Err(err) => {
                self.rollback(pending);
                self.store.enforce_invariants();
                ResponseOutcome::RolledBack(err)
            }
        }
    }

    fn rollback(&mut self, op: PendingOp) {
        match op.prior {
            PriorState::Like {
                was_liked,
                like_count,
                member,
            } => {
                self.store.like_count = like_count;
                if was_liked {
                    let member = member.unwrap_or_else(|| UserRef::unknown(op.issued_by));
                    self.store.likers.insert(op.issued_by, member);
                } else {
                    self.store.likers.remove(&op.issued_by);
                }
            }
            PriorState::Comment {
                removed,
                comment_count,
            } => {
                self.store.comments.reinsert(removed);
                self.store.comment_count = comment_count;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use agora_api::{Comment, CommentId, LikeAction, Post, PostId, Time, UserId, Uuid};
    use chrono::Utc;

    use super::*;

    fn user(name: &str) -> UserRef {
        UserRef {
            id: UserId(Uuid::new_v4()),
            name: String::from(name),
        }
    }

    fn post_with_likes(count: u32) -> Post {
        Post {
            id: PostId(Uuid::new_v4()),
            author: user("iris"),
            title: String::from("lost my locker key"),
            body: String::from("help"),
            like_count: count,
            likers: Vec::new(),
            comment_count: 0,
            created_at: Utc::now(),
        }
    }

    fn comment(parent: Option<CommentId>, at: Time) -> Comment {
        Comment {
            id: CommentId(Uuid::new_v4()),
            parent_id: parent,
            author: user("noah"),
            body: String::from("check the front desk"),
            created_at: at,
        }
    }

    fn core_with_viewer(post: Post, comments: Vec<Comment>) -> (SyncCore, UserRef) {
        let viewer = user("maya");
        (
            SyncCore::new(post, comments, Some(viewer.clone())),
            viewer,
        )
    }

    #[test]
    fn toggle_like_needs_an_identity() {
        let mut core = SyncCore::new(post_with_likes(5), Vec::new(), None);
        assert_eq!(core.toggle_like(), Err(SyncError::NotLoggedIn));
        assert_eq!(core.store().like_count, 5);
        assert_eq!(core.pending_ops(), 0);
    }

    #[test]
    fn toggle_like_applies_before_any_confirmation() {
        let (mut core, viewer) = core_with_viewer(post_with_likes(5), Vec::new());
        let dispatch = core.toggle_like().expect("toggling like");
        assert_eq!(core.store().like_count, 6);
        assert!(core.store().is_liked_by(&viewer.id));
        assert!(core.is_liked_by_viewer());
        assert_eq!(core.pending_ops(), 1);
        assert_eq!(
            dispatch.request,
            Request::ToggleLike {
                post: core.store().id
            }
        );
    }

    #[test]
    fn rejected_like_rolls_back_to_the_exact_prior_state() {
        let (mut core, viewer) = core_with_viewer(post_with_likes(5), Vec::new());
        let before = core.store().clone();
        let dispatch = core.toggle_like().expect("toggling like");
        let out = core.handle_response(
            dispatch.op,
            Err(SyncError::Api(ApiError::PermissionDenied)),
        );
        assert_eq!(
            out,
            ResponseOutcome::RolledBack(SyncError::Api(ApiError::PermissionDenied))
        );
        assert_eq!(core.store(), &before);
        assert!(!core.store().is_liked_by(&viewer.id));
        assert_eq!(core.pending_ops(), 0);
    }

    #[test]
    fn timed_out_unlike_rolls_back_membership() {
        let mut p = post_with_likes(3);
        let viewer = user("maya");
        p.likers = vec![viewer.clone()];
        let mut core = SyncCore::new(p, Vec::new(), Some(viewer.clone()));
        let dispatch = core.toggle_like().expect("toggling like off");
        assert_eq!(core.store().like_count, 2);
        assert!(!core.store().is_liked_by(&viewer.id));
        let out = core.handle_response(dispatch.op, Err(SyncError::Timeout));
        assert_eq!(out, ResponseOutcome::RolledBack(SyncError::Timeout));
        assert_eq!(core.store().like_count, 3);
        assert!(core.store().is_liked_by(&viewer.id));
        assert_eq!(core.store().likers[&viewer.id], viewer);
    }

    #[test]
    fn confirmed_like_leaves_the_optimistic_state_alone() {
        let (mut core, _) = core_with_viewer(post_with_likes(5), Vec::new());
        let dispatch = core.toggle_like().expect("toggling like");
        let out = core.handle_response(
            dispatch.op,
            Ok(Outcome::Like {
                like_count: 6,
                action: LikeAction::Liked,
            }),
        );
        assert_eq!(out, ResponseOutcome::Confirmed);
        assert_eq!(core.store().like_count, 6);
        assert_eq!(core.pending_ops(), 0);
    }

    #[test]
    fn disagreeing_response_echo_overwrites_the_counter() {
        let (mut core, _) = core_with_viewer(post_with_likes(5), Vec::new());
        let dispatch = core.toggle_like().expect("toggling like");
        // another viewer liked concurrently, the server already counts both
        let out = core.handle_response(
            dispatch.op,
            Ok(Outcome::Like {
                like_count: 7,
                action: LikeAction::Liked,
            }),
        );
        assert_eq!(out, ResponseOutcome::Confirmed);
        assert_eq!(core.store().like_count, 7);
    }

    #[test]
    fn response_after_channel_retirement_is_already_applied() {
        let (mut core, _) = core_with_viewer(post_with_likes(5), Vec::new());
        let dispatch = core.toggle_like().expect("toggling like");
        // simulate the channel echo having retired the op first
        core.pending.take(dispatch.op).expect("taking pending op");
        let out = core.handle_response(
            dispatch.op,
            Ok(Outcome::Like {
                like_count: 9,
                action: LikeAction::Liked,
            }),
        );
        assert_eq!(out, ResponseOutcome::AlreadyApplied);
        // the late echo must not re-apply anything
        assert_eq!(core.store().like_count, 6);
    }

    #[test]
    fn delete_needs_confirmation_before_any_mutation() {
        let c = comment(None, Utc::now());
        let mut p = post_with_likes(0);
        p.comment_count = 1;
        let (mut core, _) = core_with_viewer(p, vec![c.clone()]);
        assert_eq!(
            core.delete_comment(c.id, false),
            Err(SyncError::ConfirmationRequired)
        );
        assert!(core.store().comments.contains(c.id));
        assert_eq!(core.pending_ops(), 0);
    }

    #[test]
    fn failed_delete_reinserts_the_subtree_at_its_position() {
        let now = Utc::now();
        let a = comment(None, now);
        let b = comment(None, now + chrono::Duration::seconds(1));
        let reply = comment(Some(a.id), now + chrono::Duration::seconds(2));
        let mut p = post_with_likes(0);
        p.comment_count = 3;
        let (mut core, _) =
            core_with_viewer(p, vec![a.clone(), b.clone(), reply.clone()]);
        let before = core.store().clone();

        let dispatch = core
            .delete_comment(a.id, true)
            .expect("deleting comment");
        assert!(!core.store().comments.contains(a.id));
        assert!(!core.store().comments.contains(reply.id));
        assert_eq!(core.store().comment_count, 1);

        let out = core.handle_response(
            dispatch.op,
            Err(SyncError::Api(ApiError::PermissionDenied)),
        );
        assert!(matches!(out, ResponseOutcome::RolledBack(_)));
        assert_eq!(core.store(), &before);
    }

    #[test]
    fn deleting_an_already_gone_comment_is_not_found() {
        let (mut core, _) = core_with_viewer(post_with_likes(0), Vec::new());
        let id = CommentId(Uuid::new_v4());
        assert_eq!(
            core.delete_comment(id, true),
            Err(SyncError::Api(ApiError::NotFound(id.0)))
        );
    }
}
