//! Randomized event streams against the reconciliation core: whatever the
//! channel throws at it, the counters must keep matching the tree.

use agora_sync::{
    api::{
        Comment, CommentId, FeedEvent, LikeAction, LikeTarget, Post, PostId, UserId, UserRef, Uuid,
    },
    SyncCore,
};
use chrono::Utc;
use rand::{rngs::StdRng, Rng, SeedableRng};

fn user() -> UserRef {
    UserRef {
        id: UserId(Uuid::new_v4()),
        name: String::from("someone"),
    }
}

fn comment(parent: Option<CommentId>) -> Comment {
    Comment {
        id: CommentId(Uuid::new_v4()),
        parent_id: parent,
        author: user(),
        body: String::from("text"),
        created_at: Utc::now(),
    }
}

fn random_event(rng: &mut StdRng, post_id: PostId, known: &[CommentId]) -> FeedEvent {
    let pick_known = |rng: &mut StdRng| -> CommentId {
        if known.is_empty() || rng.gen_bool(0.2) {
            CommentId(Uuid::new_v4())
        } else {
            known[rng.gen_range(0..known.len())]
        }
    };
    match rng.gen_range(0..5) {
        0 => {
            let c = comment(None);
            FeedEvent::NewComment {
                post_id,
                comment: c,
                parent_comment_id: None,
            }
        }
        1 => {
            let parent = pick_known(rng);
            let c = comment(Some(parent));
            FeedEvent::NewComment {
                post_id,
                comment: c,
                parent_comment_id: Some(parent),
            }
        }
        2 => FeedEvent::DeletedComment {
            post_id,
            comment_id: pick_known(rng),
            parent_comment_id: None,
        },
        3 => {
            let mut c = comment(None);
            c.id = pick_known(rng);
            c.body = String::from("edited");
            FeedEvent::UpdatedComment {
                post_id,
                comment: c,
            }
        }
        _ => {
            let who = user();
            FeedEvent::LikeUpdate {
                post_id,
                target: post_id.0,
                target_type: LikeTarget::Post,
                like_count: rng.gen_range(0..50),
                user_id: who.id,
                action: if rng.gen_bool(0.5) {
                    LikeAction::Liked
                } else {
                    LikeAction::Unliked
                },
                liked_user: Some(who),
            }
        }
    }
}

fn check(core: &SyncCore) {
    let store = core.store();
    assert_eq!(
        store.comment_count,
        store.comments.len(),
        "comment count diverged from the tree"
    );
    for node in store.comments.top_level() {
        assert_eq!(
            node.reply_count,
            node.replies.len() as u32,
            "reply count diverged from the reply list"
        );
        for reply in &node.replies {
            assert!(reply.replies.is_empty(), "nesting deeper than one level");
        }
    }
}

#[test]
fn counters_track_the_tree_under_arbitrary_event_streams() {
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let post_id = PostId(Uuid::new_v4());
        let post = Post {
            id: post_id,
            author: user(),
            title: String::from("title"),
            body: String::from("body"),
            like_count: rng.gen_range(0..10),
            likers: Vec::new(),
            comment_count: 0,
            created_at: Utc::now(),
        };
        let mut core = SyncCore::new(post, Vec::new(), Some(user()));
        let mut last: Option<FeedEvent> = None;
        for _ in 0..400 {
            let event = if last.is_some() && rng.gen_bool(0.15) {
                // duplicate delivery of the previous event
                last.clone().expect("checked above")
            } else {
                let known: Vec<CommentId> = core
                    .store()
                    .comments
                    .top_level()
                    .iter()
                    .flat_map(|n| {
                        std::iter::once(n.id()).chain(n.replies.iter().map(|r| r.id()))
                    })
                    .collect();
                random_event(&mut rng, post_id, &known)
            };
            last = Some(event.clone());
            core.apply_event(event);
            check(&core);
        }
        assert_eq!(core.pending_ops(), 0);
    }
}
