use std::collections::HashMap;

use agora_api::{Comment, Post, PostId, Time, UserId, UserRef};

use crate::tree::{CommentTree, InsertOutcome, ReplyInsert};

/// Canonical in-memory state of one viewed post, owned by the
/// synchronizer bound to it for the lifetime of the view.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PostAggregate {
    pub id: PostId,
    pub author: UserRef,
    pub title: String,
    pub body: String,

    /// Server-derived counter; may diverge transiently from the liker set
    /// size while a reconciliation is in flight
    pub like_count: u32,
    pub likers: HashMap<UserId, UserRef>,

    pub comment_count: u32,
    pub comments: CommentTree,

    pub created_at: Time,
}

impl PostAggregate {
    /// Build the aggregate from the initial-load wire pair.
    ///
    /// Comments are fed oldest-first so top-level insertion ends up
    /// newest-first; a reply whose parent is missing from the load is kept
    /// visible at top level.
    pub fn new(post: Post, mut comments: Vec<Comment>) -> PostAggregate {
        comments.sort_by_key(|c| c.created_at);
        let mut tree = CommentTree::new();
        for comment in comments {
            let inserted = match comment.parent_id {
                None => matches!(
                    tree.insert_top_level(comment),
                    InsertOutcome::Inserted
                ),
                Some(parent) => match tree.insert_reply(parent, comment) {
                    ReplyInsert::Inserted => true,
                    ReplyInsert::AlreadyPresent => false,
                    ReplyInsert::ParentNotFound(orphan) => {
                        tracing::warn!(
                            comment = ?orphan.id,
                            ?parent,
                            "initial load carries a reply without its parent, keeping it top-level"
                        );
                        matches!(tree.insert_top_level(orphan), InsertOutcome::Inserted)
                    }
                },
            };
            if !inserted {
                tracing::warn!("initial load carries a duplicate comment id");
            }
        }
        let mut agg = PostAggregate {
            id: post.id,
            author: post.author,
            title: post.title,
            body: post.body,
            like_count: post.like_count,
            likers: post.likers.into_iter().map(|u| (u.id, u)).collect(),
            comment_count: post.comment_count,
            comments: tree,
            created_at: post.created_at,
        };
        agg.enforce_invariants();
        agg
    }

    /// Liker-set membership is the single source of truth for the
    /// viewer-facing liked flag
    pub fn is_liked_by(&self, user: &UserId) -> bool {
        self.likers.contains_key(user)
    }

    /// Clamp the denormalized counters back onto the tree. A mismatch is a
    /// bug somewhere upstream: it is logged and repaired rather than
    /// surfaced, the viewer-visible state matters more than the
    /// inconsistency.
    pub fn enforce_invariants(&mut self) {
        let fixed = self.comments.repair_reply_counts();
        if fixed > 0 {
            tracing::warn!(nodes = fixed, "reply counts diverged from reply lists, clamped");
        }
        let tree_len = self.comments.len();
        if self.comment_count != tree_len {
            tracing::warn!(
                have = self.comment_count,
                want = tree_len,
                "comment count diverged from the comment tree, clamped"
            );
            self.comment_count = tree_len;
        }
    }
}

#[cfg(test)]
mod tests {
    use agora_api::{CommentId, Uuid};
    use chrono::{Duration, Utc};

    use super::*;

    fn user(name: &str) -> UserRef {
        UserRef {
            id: UserId(Uuid::new_v4()),
            name: String::from(name),
        }
    }

    fn post() -> Post {
        Post {
            id: PostId(Uuid::new_v4()),
            author: user("iris"),
            title: String::from("exam schedule"),
            body: String::from("anyone else confused?"),
            like_count: 0,
            likers: Vec::new(),
            comment_count: 0,
            created_at: Utc::now(),
        }
    }

    fn comment_at(parent: Option<CommentId>, at: Time) -> Comment {
        Comment {
            id: CommentId(Uuid::new_v4()),
            parent_id: parent,
            author: user("noah"),
            body: String::from("same"),
            created_at: at,
        }
    }

    #[test]
    fn initial_load_orders_top_level_newest_first() {
        let now = Utc::now();
        let old = comment_at(None, now - Duration::minutes(10));
        let new = comment_at(None, now);
        let reply = comment_at(Some(old.id), now - Duration::minutes(5));
        let mut p = post();
        p.comment_count = 3;
        // deliberately shuffled
        let agg = PostAggregate::new(p, vec![new.clone(), reply.clone(), old.clone()]);
        assert_eq!(agg.comments.top_level()[0].id(), new.id);
        assert_eq!(agg.comments.top_level()[1].id(), old.id);
        assert_eq!(agg.comments.top_level()[1].replies[0].id(), reply.id);
        assert_eq!(agg.comment_count, 3);
    }

    #[test]
    fn orphaned_replies_are_kept_top_level() {
        let orphan = comment_at(Some(CommentId(Uuid::new_v4())), Utc::now());
        let mut p = post();
        p.comment_count = 1;
        let agg = PostAggregate::new(p, vec![orphan.clone()]);
        assert!(agg.comments.contains(orphan.id));
        assert_eq!(agg.comment_count, 1);
    }

    #[test]
    fn diverged_comment_count_is_clamped_to_the_tree() {
        let mut p = post();
        p.comment_count = 7;
        let agg = PostAggregate::new(p, vec![comment_at(None, Utc::now())]);
        assert_eq!(agg.comment_count, 1);
    }

    #[test]
    fn liked_flag_derives_from_the_liker_set() {
        let u = user("iris");
        let mut p = post();
        p.like_count = 1;
        p.likers = vec![u.clone()];
        let agg = PostAggregate::new(p, Vec::new());
        assert!(agg.is_liked_by(&u.id));
        assert!(!agg.is_liked_by(&UserId(Uuid::new_v4())));
    }
}
