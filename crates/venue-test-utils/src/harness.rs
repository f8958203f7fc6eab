//! In-process server and wire-protocol clients.
//!
//! [`TestVenueServer`] wires a controller to an in-memory store and a mock
//! media collaborator. [`TestClient`] drives a real `Session` with JSON text
//! frames and reads what its connection actor would have written to the
//! socket.

use common::types::{ConnectionId, SenderId, VenueId};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use venue_server::actors::{ActorMetrics, ConnectionActor, VenueControllerHandle};
use venue_server::media::mock::MockMediaTransport;
use venue_server::media::MediaTransport;
use venue_server::protocol::Frame;
use venue_server::session::Session;
use venue_server::store::memory::InMemoryVenueStore;
use venue_server::store::VenueStore;
use venue_server::venue::model::MemberKind;
use venue_server::venue::policy::{VenueUpdate, Visibility};

use crate::fixtures::TestUser;

/// How long a client waits for an expected frame.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestVenueServer {
    pub store: Arc<InMemoryVenueStore>,
    pub media: Arc<MockMediaTransport>,
    pub metrics: Arc<ActorMetrics>,
    pub controller: VenueControllerHandle,
}

impl Default for TestVenueServer {
    fn default() -> Self {
        Self::new()
    }
}

impl TestVenueServer {
    pub fn new() -> Self {
        Self::with_media(MockMediaTransport::accepting())
    }

    pub fn with_media(media: MockMediaTransport) -> Self {
        let store = Arc::new(InMemoryVenueStore::new());
        let media = Arc::new(media);
        let metrics = ActorMetrics::new();
        let controller = VenueControllerHandle::new(
            "test-server".to_string(),
            Arc::clone(&store) as Arc<dyn VenueStore>,
            Arc::clone(&media) as Arc<dyn MediaTransport>,
            Arc::clone(&metrics),
        );
        Self {
            store,
            media,
            metrics,
            controller,
        }
    }

    /// Create a private venue owned by `owner`.
    pub async fn create_venue(&self, name: &str, owner: &TestUser) -> VenueId {
        self.store
            .create_venue(name, owner.user_id)
            .await
            .expect("Failed to create venue")
    }

    /// Make a venue public so any session may load and join it.
    pub async fn open_venue(&self, venue_id: VenueId) {
        let update = VenueUpdate {
            visibility: Some(Visibility::Public),
            ..VenueUpdate::default()
        };
        self.store
            .update_venue(venue_id, &update)
            .await
            .expect("Failed to open venue");
    }

    /// Connect a receiver session.
    pub fn connect(&self, user: &TestUser) -> TestClient {
        self.connect_as(user, MemberKind::Receiver)
    }

    /// Connect a publisher session identified by `sender_id`.
    pub fn connect_sender(&self, user: &TestUser, sender_id: &str) -> TestClient {
        self.connect_as(
            user,
            MemberKind::Publisher {
                sender_id: SenderId::from(sender_id),
            },
        )
    }

    fn connect_as(&self, user: &TestUser, kind: MemberKind) -> TestClient {
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (connection, task) = ConnectionActor::spawn(
            ConnectionId::new(),
            outbound_tx,
            CancellationToken::new(),
            Arc::clone(&self.metrics),
        );
        let session = Session::new(
            user.identity(),
            kind,
            connection,
            self.controller.clone(),
            Arc::clone(&self.store) as Arc<dyn VenueStore>,
        );
        TestClient {
            session,
            outbound: outbound_rx,
            backlog: VecDeque::new(),
            next_id: 0,
            task,
        }
    }
}

/// A response frame, flattened for assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub was_success: bool,
    pub message: Option<String>,
    pub data: Value,
}

pub struct TestClient {
    session: Session,
    outbound: mpsc::Receiver<String>,
    /// Frames read while waiting for something else.
    backlog: VecDeque<Frame>,
    next_id: u64,
    task: JoinHandle<()>,
}

impl TestClient {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.session.connection_id()
    }

    /// Send a raw text frame.
    pub async fn send_text(&mut self, text: &str) {
        self.session.handle_text(text).await;
    }

    /// Send a request and wait for its response. Returns the request id too.
    pub async fn request_with_id(&mut self, subject: &str, data: Value) -> (String, Response) {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let frame = json!({ "type": "request", "id": id, "subject": subject, "data": data });
        self.session.handle_text(&frame.to_string()).await;

        let response = self
            .wait_for(|frame| matches!(frame, Frame::Response { id: rid, .. } if *rid == id))
            .await
            .unwrap_or_else(|| panic!("No response to {subject}"));
        match response {
            Frame::Response {
                was_success,
                message,
                data,
                ..
            } => (
                id,
                Response {
                    was_success,
                    message,
                    data,
                },
            ),
            other => panic!("Expected response, got {other:?}"),
        }
    }

    pub async fn request(&mut self, subject: &str, data: Value) -> Response {
        self.request_with_id(subject, data).await.1
    }

    /// Send a request and give up on it after `after`, dropping the
    /// in-flight handler the way a closed socket does.
    pub async fn abandon_request(&mut self, subject: &str, data: Value, after: Duration) {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let frame = json!({ "type": "request", "id": id, "subject": subject, "data": data });
        let _ = tokio::time::timeout(after, self.session.handle_text(&frame.to_string())).await;
    }

    /// Send a request that must succeed; returns its data.
    pub async fn call(&mut self, subject: &str, data: Value) -> Value {
        let response = self.request(subject, data).await;
        assert!(
            response.was_success,
            "{subject} failed: {:?}",
            response.message
        );
        response.data
    }

    /// Send a request that must fail; returns its message.
    pub async fn call_err(&mut self, subject: &str, data: Value) -> String {
        let response = self.request(subject, data).await;
        assert!(!response.was_success, "{subject} unexpectedly succeeded");
        response.message.unwrap_or_default()
    }

    /// Subscribe to a slot; returns the subscription id.
    pub async fn subscribe(&mut self, slot: &str) -> String {
        let (id, response) = self.request_with_id(slot, Value::Null).await;
        assert!(
            response.was_success,
            "subscribe {slot} failed: {:?}",
            response.message
        );
        id
    }

    /// Wait for the next pushed message with `subject`.
    pub async fn next_message(&mut self, subject: &str) -> Value {
        self.try_next_message(subject)
            .await
            .unwrap_or_else(|| panic!("No {subject} message"))
    }

    pub async fn try_next_message(&mut self, subject: &str) -> Option<Value> {
        let frame = self
            .wait_for(|frame| matches!(frame, Frame::Message { subject: s, .. } if s == subject))
            .await?;
        match frame {
            Frame::Message { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Latest pushed message with `subject` after letting pending pushes
    /// arrive.
    pub async fn latest_message(&mut self, subject: &str) -> Option<Value> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.fill_backlog();
        let mut latest = None;
        self.backlog.retain(|frame| match frame {
            Frame::Message { subject: s, data, .. } if s == subject => {
                latest = Some(data.clone());
                false
            }
            _ => true,
        });
        latest
    }

    /// Drop everything received so far.
    pub async fn clear(&mut self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.fill_backlog();
        self.backlog.clear();
    }

    /// Whether the connection has been closed on the server side.
    pub fn is_closed(&self) -> bool {
        self.session.connection().is_cancelled()
    }

    pub async fn disconnect(mut self) {
        self.session.on_disconnect().await;
        drop(self.session);
        let _ = tokio::time::timeout(FRAME_TIMEOUT, self.task).await;
    }

    fn fill_backlog(&mut self) {
        while let Ok(text) = self.outbound.try_recv() {
            self.backlog.push_back(parse_frame(&text));
        }
    }

    async fn wait_for(&mut self, matches: impl Fn(&Frame) -> bool) -> Option<Frame> {
        if let Some(position) = self.backlog.iter().position(&matches) {
            return self.backlog.remove(position);
        }
        let deadline = tokio::time::Instant::now() + FRAME_TIMEOUT;
        loop {
            let text = tokio::time::timeout_at(deadline, self.outbound.recv())
                .await
                .ok()??;
            let frame = parse_frame(&text);
            if matches(&frame) {
                return Some(frame);
            }
            self.backlog.push_back(frame);
        }
    }
}

fn parse_frame(text: &str) -> Frame {
    serde_json::from_str(text).unwrap_or_else(|e| panic!("Invalid outbound frame {text}: {e}"))
}
