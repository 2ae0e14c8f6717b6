use agora_api::{FeedEvent, LikeAction, LikeTarget, UserRef};

use crate::{
    core::{EventOutcome, SyncCore},
    pending::PendingKind,
    tree::{InsertOutcome, ReplyInsert},
};

impl SyncCore {
    /// Merge one inbound authoritative event into the store.
    ///
    /// Events are applied strictly in arrival order and every kind is
    /// idempotent under duplicate delivery. Authoritative events always
    /// win on counters; optimistic local membership changes are reconciled
    /// by idempotent matching, never blindly overwritten while a matching
    /// pending entry is outstanding.
    pub fn apply_event(&mut self, event: FeedEvent) -> EventOutcome {
        let mut out = EventOutcome::default();
        if event.post_id() != self.store.id {
            tracing::debug!(
                event_post = ?event.post_id(),
                store_post = ?self.store.id,
                "dropping event for another post"
            );
            return out;
        }
        match event {
            FeedEvent::NewComment {
                comment,
                parent_comment_id,
                ..
            } => {
                // Already present covers both a duplicate delivery and this
                // viewer's own optimistic insert.
                let inserted = match parent_comment_id {
                    None => matches!(
                        self.store.comments.insert_top_level(comment),
                        InsertOutcome::Inserted
                    ),
                    Some(parent) => match self.store.comments.insert_reply(parent, comment) {
                        ReplyInsert::Inserted => true,
                        ReplyInsert::AlreadyPresent => false,
                        ReplyInsert::ParentNotFound(orphan) => {
                            tracing::warn!(
                                comment = ?orphan.id,
                                ?parent,
                                "new comment's parent is gone, keeping it top-level"
                            );
                            matches!(
                                self.store.comments.insert_top_level(orphan),
                                InsertOutcome::Inserted
                            )
                        }
                    },
                };
                if inserted {
                    self.store.comment_count += 1;
                    out.changed = true;
                }
            }
            FeedEvent::DeletedComment { comment_id, .. } => {
                let own_delete = self.viewer.as_ref().and_then(|viewer| {
                    self.pending
                        .retire_matching(PendingKind::DeleteComment, comment_id.0, viewer.id)
                });
                if let Some(op) = own_delete {
                    // our optimistic removal, confirmed by the channel
                    // before the request response
                    out.retired = Some(op.id);
                } else if let Some(removed) = self.store.comments.remove(comment_id) {
                    let subtree = removed.node.subtree_len();
                    if self.store.comment_count < subtree {
                        tracing::warn!(
                            have = self.store.comment_count,
                            removing = subtree,
                            "comment count would go negative, clamping"
                        );
                    }
                    self.store.comment_count = self.store.comment_count.saturating_sub(subtree);
                    out.changed = true;
                }
                // already absent: duplicate delivery or a lost race, no-op
            }
            FeedEvent::UpdatedComment { comment, .. } => {
                out.changed = self.store.comments.update(comment);
            }
            FeedEvent::LikeUpdate {
                target,
                target_type,
                like_count,
                user_id,
                action,
                liked_user,
                ..
            } => {
                if target_type != LikeTarget::Post || target != self.store.id.0 {
                    tracing::debug!(?target, ?target_type, "ignoring like update for a non-post target");
                    return out;
                }
                if self.store.like_count != like_count {
                    self.store.like_count = like_count;
                    out.changed = true;
                }
                match action {
                    LikeAction::Liked => {
                        if !self.store.likers.contains_key(&user_id) {
                            let member =
                                liked_user.unwrap_or_else(|| UserRef::unknown(user_id));
                            self.store.likers.insert(user_id, member);
                            out.changed = true;
                        }
                    }
                    LikeAction::Unliked => {
                        if self.store.likers.remove(&user_id).is_some() {
                            out.changed = true;
                        }
                    }
                }
                if self.viewer.as_ref().map(|v| v.id) == Some(user_id) {
                    let kind = match action {
                        LikeAction::Liked => PendingKind::Like,
                        LikeAction::Unliked => PendingKind::Unlike,
                    };
                    if let Some(op) =
                        self.pending.retire_matching(kind, self.store.id.0, user_id)
                    {
                        out.retired = Some(op.id);
                    }
                }
            }
            FeedEvent::UpdatedPost { post } => {
                // field-by-field, skipping fields shadowed by an in-flight
                // pending operation
                if self.store.title != post.title {
                    self.store.title = post.title;
                    out.changed = true;
                }
                if self.store.body != post.body {
                    self.store.body = post.body;
                    out.changed = true;
                }
                if !self.pending.shadows_likes() {
                    let likers: std::collections::HashMap<_, _> =
                        post.likers.into_iter().map(|u| (u.id, u)).collect();
                    if self.store.like_count != post.like_count || self.store.likers != likers {
                        self.store.like_count = post.like_count;
                        self.store.likers = likers;
                        out.changed = true;
                    }
                }
                // comment_count is denormalized from the tree, which the
                // comment events above keep current; it is never copied
                // wholesale from a post snapshot
            }
        }
        if out.changed {
            self.store.enforce_invariants();
        }
        out
    }
}
