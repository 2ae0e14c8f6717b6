//! In-memory forum backend for tests: an [`ActionClient`] and
//! [`ChannelTransport`] over shared state, with knobs for scripting
//! failures, holding back events and duplicating delivery.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
};

use agora_api::{
    ActionClient, ChannelConnection, ChannelTransport, Comment, CommentId, Error, FeedEvent,
    FeedMessage, LikeAction, LikeTarget, Outcome, Post, PostId, Request, UserId, UserRef, Uuid,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct MockForum {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    posts: HashMap<PostId, PostRecord>,
    users: HashMap<UserId, UserRef>,
    conns: HashMap<Uuid, ConnEntry>,
    scripted_failures: VecDeque<Error>,
    // when Some, broadcasts buffer here instead of going out
    held: Option<Vec<FeedEvent>>,
    duplicate_delivery: bool,
    fail_next_connects: u32,
}

struct PostRecord {
    post: Post,
    likers: HashMap<UserId, UserRef>,
    comments: HashMap<CommentId, Comment>,
}

struct ConnEntry {
    tx: mpsc::UnboundedSender<FeedMessage>,
    rooms: HashSet<PostId>,
}

impl Default for MockForum {
    fn default() -> MockForum {
        MockForum::new()
    }
}

impl MockForum {
    pub fn new() -> MockForum {
        MockForum {
            inner: Arc::new(Mutex::new(Inner {
                posts: HashMap::new(),
                users: HashMap::new(),
                conns: HashMap::new(),
                scripted_failures: VecDeque::new(),
                held: None,
                duplicate_delivery: false,
                fail_next_connects: 0,
            })),
        }
    }

    pub fn add_user(&self, user: UserRef) {
        self.lock().users.insert(user.id, user);
    }

    pub fn add_post(&self, post: Post, comments: Vec<Comment>) {
        let mut inner = self.lock();
        let likers = post.likers.iter().map(|u| (u.id, u.clone())).collect();
        inner.posts.insert(
            post.id,
            PostRecord {
                post,
                likers,
                comments: comments.into_iter().map(|c| (c.id, c)).collect(),
            },
        );
    }

    /// Authoritative view of a post as the server would serve it
    pub fn post(&self, id: PostId) -> Option<Post> {
        let inner = self.lock();
        inner.posts.get(&id).map(|r| r.materialize())
    }

    pub fn comments(&self, id: PostId) -> Vec<Comment> {
        let inner = self.lock();
        match inner.posts.get(&id) {
            Some(r) => r.comments.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Commit a comment as some other viewer and push it to the rooms
    pub fn publish_comment(&self, post_id: PostId, comment: Comment) {
        let mut inner = self.lock();
        let Some(record) = inner.posts.get_mut(&post_id) else {
            panic!("publishing a comment to an unknown post");
        };
        let parent_comment_id = comment.parent_id;
        record.comments.insert(comment.id, comment.clone());
        record.post.comment_count += 1;
        inner.broadcast(FeedEvent::NewComment {
            post_id,
            comment,
            parent_comment_id,
        });
    }

    /// Push a raw event without touching server state
    pub fn emit(&self, event: FeedEvent) {
        self.lock().broadcast(event);
    }

    /// Fail the next authoritative request with `err`, leaving server
    /// state untouched
    pub fn fail_next_request(&self, err: Error) {
        self.lock().scripted_failures.push_back(err);
    }

    /// Fail the next `n` channel connection attempts
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().fail_next_connects = n;
    }

    /// Buffer outgoing events instead of delivering them, until
    /// [`MockForum::release_held_events`]
    pub fn hold_events(&self) {
        let mut inner = self.lock();
        if inner.held.is_none() {
            inner.held = Some(Vec::new());
        }
    }

    pub fn release_held_events(&self) {
        let mut inner = self.lock();
        if let Some(held) = inner.held.take() {
            for event in held {
                inner.broadcast(event);
            }
        }
    }

    /// Deliver every subsequent event twice, for duplicate-absorption tests
    pub fn set_duplicate_delivery(&self, dup: bool) {
        self.lock().duplicate_delivery = dup;
    }

    /// Drop every live channel connection, as a network cut would
    pub fn disconnect_all(&self) {
        self.lock().conns.clear();
    }

    /// How many live connections are subscribed to `room`
    pub fn subscriber_count(&self, room: PostId) -> usize {
        self.lock()
            .conns
            .values()
            .filter(|c| c.rooms.contains(&room))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("forum lock poisoned")
    }
}

impl PostRecord {
    fn materialize(&self) -> Post {
        let mut post = self.post.clone();
        post.likers = self.likers.values().cloned().collect();
        post
    }
}

impl Inner {
    fn broadcast(&mut self, event: FeedEvent) {
        if let Some(held) = &mut self.held {
            held.push(event);
            return;
        }
        self.deliver(&event);
        if self.duplicate_delivery {
            self.deliver(&event);
        }
    }

    fn deliver(&mut self, event: &FeedEvent) {
        let room = event.post_id();
        self.conns.retain(|_, conn| {
            if !conn.rooms.contains(&room) {
                return true;
            }
            conn.tx.send(FeedMessage::Event(event.clone())).is_ok()
        });
    }
}

#[async_trait]
impl ActionClient for MockForum {
    async fn submit(&self, from: UserId, request: Request) -> Result<Outcome, Error> {
        let mut inner = self.lock();
        if let Some(err) = inner.scripted_failures.pop_front() {
            return Err(err);
        }
        match request {
            Request::ToggleLike { post } => {
                let liked_user = inner.users.get(&from).cloned();
                let record = inner
                    .posts
                    .get_mut(&post)
                    .ok_or(Error::NotFound(post.0))?;
                let action = if record.likers.remove(&from).is_some() {
                    record.post.like_count = record.post.like_count.saturating_sub(1);
                    LikeAction::Unliked
                } else {
                    let user = liked_user
                        .clone()
                        .unwrap_or_else(|| UserRef::unknown(from));
                    record.likers.insert(from, user);
                    record.post.like_count += 1;
                    LikeAction::Liked
                };
                let like_count = record.post.like_count;
                inner.broadcast(FeedEvent::LikeUpdate {
                    post_id: post,
                    target: post.0,
                    target_type: LikeTarget::Post,
                    like_count,
                    user_id: from,
                    action,
                    liked_user,
                });
                Ok(Outcome::Like { like_count, action })
            }
            Request::DeleteEntity { id } => {
                let comment_id = CommentId(id);
                let (post_id, record) = inner
                    .posts
                    .iter_mut()
                    .find(|(_, r)| r.comments.contains_key(&comment_id))
                    .map(|(id, r)| (*id, r))
                    .ok_or(Error::NotFound(id))?;
                let removed = record
                    .comments
                    .remove(&comment_id)
                    .ok_or(Error::NotFound(id))?;
                // one-level nesting: deleting a top-level comment takes its
                // replies with it
                let replies: Vec<CommentId> = record
                    .comments
                    .values()
                    .filter(|c| c.parent_id == Some(comment_id))
                    .map(|c| c.id)
                    .collect();
                for reply in &replies {
                    record.comments.remove(reply);
                }
                let gone = 1 + replies.len() as u32;
                record.post.comment_count = record.post.comment_count.saturating_sub(gone);
                inner.broadcast(FeedEvent::DeletedComment {
                    post_id,
                    comment_id,
                    parent_comment_id: removed.parent_id,
                });
                Ok(Outcome::Deleted)
            }
        }
    }
}

#[async_trait]
impl ChannelTransport for MockForum {
    async fn connect(&self) -> Result<Box<dyn ChannelConnection>, Error> {
        let mut inner = self.lock();
        if inner.fail_next_connects > 0 {
            inner.fail_next_connects -= 1;
            return Err(Error::Unknown(String::from("connection refused")));
        }
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        inner.conns.insert(
            id,
            ConnEntry {
                tx,
                rooms: HashSet::new(),
            },
        );
        Ok(Box::new(MockConnection {
            forum: self.clone(),
            id,
            rx,
        }))
    }
}

pub struct MockConnection {
    forum: MockForum,
    id: Uuid,
    rx: mpsc::UnboundedReceiver<FeedMessage>,
}

#[async_trait]
impl ChannelConnection for MockConnection {
    async fn subscribe(&mut self, room: PostId) -> Result<(), Error> {
        let mut inner = self.forum.lock();
        match inner.conns.get_mut(&self.id) {
            Some(conn) => {
                conn.rooms.insert(room);
                Ok(())
            }
            None => Err(Error::Unknown(String::from("connection closed"))),
        }
    }

    async fn unsubscribe(&mut self, room: PostId) -> Result<(), Error> {
        let mut inner = self.forum.lock();
        match inner.conns.get_mut(&self.id) {
            Some(conn) => {
                conn.rooms.remove(&room);
                Ok(())
            }
            None => Err(Error::Unknown(String::from("connection closed"))),
        }
    }

    async fn ping(&mut self) -> Result<(), Error> {
        let inner = self.forum.lock();
        match inner.conns.get(&self.id) {
            Some(conn) => {
                let _ = conn.tx.send(FeedMessage::Pong);
                Ok(())
            }
            None => Err(Error::Unknown(String::from("connection closed"))),
        }
    }

    async fn next_message(&mut self) -> Option<FeedMessage> {
        self.rx.recv().await
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.forum.lock().conns.remove(&self.id);
    }
}
