use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{mpsc, oneshot, watch};

mod applier;
mod core;
mod error;
mod feed;
mod pending;
mod reconcile;
mod store;
mod tree;

pub use crate::core::{Dispatch, EventOutcome, ResponseOutcome, SyncCore};
pub use error::SyncError;
pub use feed::SubscriptionManager;
pub use pending::{OpId, PendingKind, PendingOp, PendingSet, PriorState};
pub use store::PostAggregate;
pub use tree::{CommentNode, CommentTree, InsertOutcome, Placement, RemovedComment, ReplyInsert};

pub mod api {
    pub use agora_api::*;
}

// An authoritative request that does not resolve within this window is
// treated as failed for rollback purposes; a late server-side effect is
// absorbed by the idempotent event handling.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

enum Intent {
    ToggleLike {
        done: oneshot::Sender<Result<(), SyncError>>,
    },
    DeleteComment {
        id: api::CommentId,
        confirmed: bool,
        done: oneshot::Sender<Result<(), SyncError>>,
    },
}

/// One post's synchronizer: owns the aggregate for the lifetime of the
/// view and reconciles optimistic local mutations with the authoritative
/// event feed.
///
/// All state lives in a worker task that handles one message to
/// completion before the next, so the aggregate needs no locking. Intents
/// resolve when the operation reaches its final disposition (confirmed by
/// whichever authoritative signal arrives first, or rolled back); the
/// optimistic state is visible through [`PostSync::watch`] immediately.
///
/// Dropping the synchronizer (or calling [`PostSync::shutdown`]) leaves
/// the room and discards the aggregate; late responses and events are
/// dropped harmlessly.
pub struct PostSync {
    post: api::PostId,
    intents: mpsc::UnboundedSender<Intent>,
    snapshots: watch::Receiver<PostAggregate>,
    worker: tokio::task::JoinHandle<()>,
}

impl PostSync {
    pub fn spawn(
        post: api::Post,
        comments: Vec<api::Comment>,
        viewer: Option<api::UserRef>,
        actions: Arc<dyn api::ActionClient>,
        subscriptions: &SubscriptionManager,
    ) -> PostSync {
        let post_id = post.id;
        let core = SyncCore::new(post, comments, viewer);
        let (snap_tx, snap_rx) = watch::channel(core.store().clone());
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let feed = subscriptions.join(post_id);
        if feed.is_none() {
            tracing::warn!(
                post = ?post_id,
                "spawning a synchronizer for a room that is already joined; it will see no events"
            );
        }
        let worker = Worker {
            core,
            actions,
            snapshots: snap_tx,
            results: result_tx,
            waiters: HashMap::new(),
        };
        let subscriptions = subscriptions.clone();
        let worker = tokio::spawn(worker.run(intent_rx, result_rx, feed, subscriptions, post_id));
        PostSync {
            post: post_id,
            intents: intent_tx,
            snapshots: snap_rx,
            worker,
        }
    }

    pub fn id(&self) -> api::PostId {
        self.post
    }

    /// Current aggregate snapshot
    pub fn snapshot(&self) -> PostAggregate {
        self.snapshots.borrow().clone()
    }

    /// Change notifications for the presentation layer: the watched value
    /// is replaced on every store change
    pub fn watch(&self) -> watch::Receiver<PostAggregate> {
        self.snapshots.clone()
    }

    /// Flip the viewer's like. The flip is visible through the snapshot
    /// immediately; the returned future resolves on the final disposition.
    pub async fn toggle_like(&self) -> Result<(), SyncError> {
        let (done, rx) = oneshot::channel();
        self.intents
            .send(Intent::ToggleLike { done })
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Remove a comment or reply. `confirmed` must carry the viewer's
    /// explicit confirmation; without it nothing is touched.
    pub async fn delete_comment(
        &self,
        id: api::CommentId,
        confirmed: bool,
    ) -> Result<(), SyncError> {
        let (done, rx) = oneshot::channel();
        self.intents
            .send(Intent::DeleteComment {
                id,
                confirmed,
                done,
            })
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Leave the room and discard the aggregate, waiting for the worker
    /// to wind down
    pub async fn shutdown(self) {
        let PostSync {
            intents, worker, ..
        } = self;
        drop(intents);
        if let Err(err) = worker.await {
            tracing::warn!(?err, "synchronizer worker panicked during shutdown");
        }
    }
}

struct Worker {
    core: SyncCore,
    actions: Arc<dyn api::ActionClient>,
    snapshots: watch::Sender<PostAggregate>,
    results: mpsc::UnboundedSender<(OpId, Result<api::Outcome, SyncError>)>,
    waiters: HashMap<OpId, oneshot::Sender<Result<(), SyncError>>>,
}

impl Worker {
    async fn run(
        mut self,
        mut intents: mpsc::UnboundedReceiver<Intent>,
        mut results: mpsc::UnboundedReceiver<(OpId, Result<api::Outcome, SyncError>)>,
        mut feed: Option<mpsc::UnboundedReceiver<api::FeedEvent>>,
        subscriptions: SubscriptionManager,
        post: api::PostId,
    ) {
        // only the instance that actually joined the room may leave it
        let owns_feed = feed.is_some();
        loop {
            tokio::select! {
                intent = intents.recv() => match intent {
                    // the handle was dropped: the view is gone
                    None => break,
                    Some(intent) => self.handle_intent(intent),
                },
                result = results.recv() => match result {
                    None => break,
                    Some((op, result)) => self.handle_result(op, result),
                },
                event = recv_feed(&mut feed) => match event {
                    None => feed = None,
                    Some(event) => self.handle_event(event),
                },
            }
        }
        // unsubscribing is mandatory when the aggregate is discarded
        if owns_feed {
            subscriptions.leave(post);
        }
        for (_, done) in self.waiters.drain() {
            let _ = done.send(Err(SyncError::Closed));
        }
        tracing::debug!(?post, "synchronizer shut down");
    }

    fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::ToggleLike { done } => match self.core.toggle_like() {
                Ok(dispatch) => {
                    self.publish();
                    self.dispatch(dispatch, done);
                }
                Err(err) => {
                    let _ = done.send(Err(err));
                }
            },
            Intent::DeleteComment {
                id,
                confirmed,
                done,
            } => match self.core.delete_comment(id, confirmed) {
                Ok(dispatch) => {
                    self.publish();
                    self.dispatch(dispatch, done);
                }
                Err(err) => {
                    let _ = done.send(Err(err));
                }
            },
        }
    }

    fn dispatch(&mut self, dispatch: Dispatch, done: oneshot::Sender<Result<(), SyncError>>) {
        self.waiters.insert(dispatch.op, done);
        let actions = self.actions.clone();
        let results = self.results.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(
                REQUEST_TIMEOUT,
                actions.submit(dispatch.issued_by, dispatch.request),
            )
            .await
            {
                Ok(Ok(outcome)) => Ok(outcome),
                Ok(Err(err)) => Err(SyncError::Api(err)),
                Err(_) => Err(SyncError::Timeout),
            };
            // the synchronizer may be gone by now; a closed queue just
            // discards the late result
            let _ = results.send((dispatch.op, result));
        });
    }

    fn handle_result(&mut self, op: OpId, result: Result<api::Outcome, SyncError>) {
        match self.core.handle_response(op, result) {
            ResponseOutcome::Confirmed => {
                self.publish();
                self.notify(op, Ok(()));
            }
            // a channel event already confirmed and notified
            ResponseOutcome::AlreadyApplied => {}
            ResponseOutcome::RolledBack(err) => {
                self.publish();
                self.notify(op, Err(err));
            }
        }
    }

    fn handle_event(&mut self, event: api::FeedEvent) {
        let out = self.core.apply_event(event);
        if let Some(op) = out.retired {
            self.notify(op, Ok(()));
        }
        if out.changed {
            self.publish();
        }
    }

    fn notify(&mut self, op: OpId, result: Result<(), SyncError>) {
        if let Some(done) = self.waiters.remove(&op) {
            let _ = done.send(result);
        }
    }

    fn publish(&self) {
        let _ = self.snapshots.send(self.core.store().clone());
    }
}

async fn recv_feed(
    feed: &mut Option<mpsc::UnboundedReceiver<api::FeedEvent>>,
) -> Option<api::FeedEvent> {
    match feed {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
