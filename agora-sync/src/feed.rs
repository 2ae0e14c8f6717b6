use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use agora_api::{ChannelTransport, FeedEvent, FeedMessage, PostId};
use tokio::sync::mpsc;
use tokio::time::Instant;

// Pings are sent every PING_INTERVAL
const PING_INTERVAL: Duration = Duration::from_secs(10);
// If the interval between two pongs is more than DISCONNECT_INTERVAL, reconnect
const DISCONNECT_INTERVAL: Duration = Duration::from_secs(20);
// Space each reconnect attempt by ATTEMPT_SPACING
const ATTEMPT_SPACING: Duration = Duration::from_secs(1);

type Rooms = Arc<Mutex<HashMap<PostId, mpsc::UnboundedSender<FeedEvent>>>>;

enum RoomCmd {
    Join(PostId),
    Leave(PostId),
}

/// Multiplexes one channel connection into per-post event sinks.
///
/// Reconnection and resubscription are internal: after a connection loss
/// the manager reconnects and resubscribes every joined room itself, the
/// subscribers never notice. Delivery across the reconnect gap is
/// best-effort; events committed while the connection was down are not
/// replayed.
#[derive(Clone)]
pub struct SubscriptionManager {
    rooms: Rooms,
    cmds: mpsc::UnboundedSender<RoomCmd>,
}

impl SubscriptionManager {
    /// Start the connection driver task. It runs until every clone of the
    /// returned manager is dropped.
    pub fn spawn(transport: Arc<dyn ChannelTransport>) -> SubscriptionManager {
        let rooms: Rooms = Arc::new(Mutex::new(HashMap::new()));
        let (cmds, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(transport, rooms.clone(), cmd_rx));
        SubscriptionManager { rooms, cmds }
    }

    /// Establish interest in events for `post`, returning the exclusive
    /// event sink. Idempotent: a second join while already joined is a
    /// no-op (`None`) and the original sink stays registered.
    pub fn join(&self, post: PostId) -> Option<mpsc::UnboundedReceiver<FeedEvent>> {
        let mut rooms = self.rooms.lock().expect("rooms lock poisoned");
        if rooms.contains_key(&post) {
            tracing::debug!(?post, "join for an already-joined room is a no-op");
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        rooms.insert(post, tx);
        let _ = self.cmds.send(RoomCmd::Join(post));
        Some(rx)
    }

    /// Stop delivery for `post`. Idempotent; events already in flight for
    /// the room are dropped once the entry is gone.
    pub fn leave(&self, post: PostId) {
        let removed = self
            .rooms
            .lock()
            .expect("rooms lock poisoned")
            .remove(&post)
            .is_some();
        if removed {
            let _ = self.cmds.send(RoomCmd::Leave(post));
        }
    }

    pub fn is_joined(&self, post: PostId) -> bool {
        self.rooms
            .lock()
            .expect("rooms lock poisoned")
            .contains_key(&post)
    }
}

async fn drive(
    transport: Arc<dyn ChannelTransport>,
    rooms: Rooms,
    mut cmds: mpsc::UnboundedReceiver<RoomCmd>,
) {
    let mut first_attempt = true;
    'reconnect: loop {
        match first_attempt {
            true => first_attempt = false,
            false => {
                tracing::warn!("lost channel connection");
                tokio::time::sleep(ATTEMPT_SPACING).await;
            }
        }

        let mut conn = match transport.connect().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(?err, "failed connecting to channel");
                continue 'reconnect;
            }
        };

        // Resubscribe every room joined before or during the outage
        let joined: Vec<PostId> = rooms
            .lock()
            .expect("rooms lock poisoned")
            .keys()
            .copied()
            .collect();
        for room in joined {
            if let Err(err) = conn.subscribe(room).await {
                tracing::warn!(?err, ?room, "failed resubscribing after reconnect");
                continue 'reconnect;
            }
        }
        tracing::debug!("channel connected");

        let mut next_ping = Instant::now();
        let mut last_pong = Instant::now();
        loop {
            tokio::select! {
                cmd = cmds.recv() => match cmd {
                    None => {
                        tracing::debug!("all subscription handles dropped, closing channel");
                        return;
                    }
                    Some(RoomCmd::Join(room)) => {
                        if let Err(err) = conn.subscribe(room).await {
                            tracing::warn!(?err, ?room, "failed subscribing");
                            continue 'reconnect;
                        }
                    }
                    Some(RoomCmd::Leave(room)) => {
                        if let Err(err) = conn.unsubscribe(room).await {
                            tracing::warn!(?err, ?room, "failed unsubscribing");
                            continue 'reconnect;
                        }
                    }
                },
                _ = tokio::time::sleep_until(next_ping) => {
                    if conn.ping().await.is_err() {
                        continue 'reconnect;
                    }
                    next_ping += PING_INTERVAL;
                }
                _ = tokio::time::sleep_until(last_pong + DISCONNECT_INTERVAL) => {
                    continue 'reconnect;
                }
                msg = conn.next_message() => match msg {
                    None => continue 'reconnect,
                    Some(FeedMessage::Pong) => last_pong = Instant::now(),
                    Some(FeedMessage::Event(event)) => dispatch(&rooms, event),
                }
            }
        }
    }
}

fn dispatch(rooms: &Rooms, event: FeedEvent) {
    let rooms = rooms.lock().expect("rooms lock poisoned");
    match rooms.get(&event.post_id()) {
        Some(sink) => {
            if sink.send(event).is_err() {
                tracing::debug!("event sink dropped before leave, dropping event");
            }
        }
        // late event for a room we already left, or one never joined
        None => tracing::debug!(post = ?event.post_id(), "dropping event for an unjoined room"),
    }
}
