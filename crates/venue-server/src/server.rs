//! Websocket endpoint.
//!
//! `GET /ws` upgrades to a session connection. Before upgrading:
//! 1. The identity token (`token` query parameter or `Authorization: Bearer`)
//!    is validated; failures answer `403`
//! 2. `clientType=sender&senderId=...` selects a publisher session
//! 3. A connection permit is taken; when none is left the answer is `503`
//!
//! Each upgraded connection runs three tasks:
//! - a reader that watches the socket and queues text frames
//! - the session loop, handling queued requests one at a time in receipt order
//! - a writer draining the `ConnectionActor`'s outbound channel
//!
//! The reader keeps polling while a request is in flight, so a close or a
//! socket error cancels that request and tears the session down at once.

use crate::actors::{ActorMetrics, ConnectionActor, VenueControllerHandle};
use crate::auth::{extract_token, Identity, IdentityValidator};
use crate::observability::metrics;
use crate::protocol::MAX_FRAME_BYTES;
use crate::session::Session;
use crate::store::VenueStore;
use crate::venue::model::MemberKind;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use common::types::{ConnectionId, SenderId};
use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

/// Serialized frames queued for one socket writer.
const OUTBOUND_BUFFER: usize = 256;

/// Requests read ahead of the one being handled. A client that exceeds it is
/// disconnected.
const PENDING_REQUESTS: usize = 64;

/// Shared state of the websocket endpoint.
pub struct ServerState {
    controller: VenueControllerHandle,
    store: Arc<dyn VenueStore>,
    validator: IdentityValidator,
    metrics: Arc<ActorMetrics>,
    connection_limit: Arc<Semaphore>,
    idle_timeout: Duration,
    /// Parent of every connection's token.
    shutdown: CancellationToken,
}

impl ServerState {
    #[must_use]
    pub fn new(
        controller: VenueControllerHandle,
        store: Arc<dyn VenueStore>,
        validator: IdentityValidator,
        metrics: Arc<ActorMetrics>,
        max_connections: usize,
        idle_timeout: Duration,
    ) -> Self {
        let shutdown = controller.child_token();
        Self {
            controller,
            store,
            validator,
            metrics,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            idle_timeout,
            shutdown,
        }
    }
}

/// Build the websocket router.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectParams {
    token: Option<String>,
    client_type: Option<String>,
    sender_id: Option<String>,
}

fn member_kind(params: &ConnectParams) -> Result<MemberKind, &'static str> {
    match params.client_type.as_deref() {
        None | Some("client") => Ok(MemberKind::Receiver),
        Some("sender") => match params.sender_id.as_deref().map(str::trim) {
            Some(sender_id) if !sender_id.is_empty() => Ok(MemberKind::Publisher {
                sender_id: SenderId::from(sender_id),
            }),
            _ => Err("senderId is required for sender connections"),
        },
        Some(_) => Err("Unknown clientType"),
    }
}

async fn ws_handler(
    ws: Option<WebSocketUpgrade>,
    State(state): State<Arc<ServerState>>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());
    let identity = match extract_token(params.token.as_deref(), authorization)
        .map(|token| state.validator.validate(token))
    {
        Some(Ok(identity)) => identity,
        Some(Err(e)) => {
            debug!(target: "venue.server", error = %e, "Upgrade rejected: invalid token");
            return (StatusCode::FORBIDDEN, "Forbidden").into_response();
        }
        None => {
            debug!(target: "venue.server", "Upgrade rejected: missing token");
            return (StatusCode::FORBIDDEN, "Forbidden").into_response();
        }
    };

    let kind = match member_kind(&params) {
        Ok(kind) => kind,
        Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };

    let Ok(permit) = Arc::clone(&state.connection_limit).try_acquire_owned() else {
        warn!(target: "venue.server", "Connection limit reached, rejecting upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    let Some(ws) = ws else {
        return (StatusCode::UPGRADE_REQUIRED, "Websocket upgrade required").into_response();
    };

    ws.max_message_size(MAX_FRAME_BYTES)
        .on_failed_upgrade(|error| {
            warn!(target: "venue.server", error = %error, "Websocket upgrade failed");
        })
        .on_upgrade(move |socket| serve_connection(socket, state, identity, kind, permit))
}

#[instrument(skip_all, name = "venue.server.connection", fields(connection_id = tracing::field::Empty))]
async fn serve_connection(
    socket: WebSocket,
    state: Arc<ServerState>,
    identity: Identity,
    kind: MemberKind,
    _permit: OwnedSemaphorePermit,
) {
    let connection_id = ConnectionId::new();
    tracing::Span::current().record("connection_id", tracing::field::display(connection_id));

    let (mut ws_sender, ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let cancel_token = state.shutdown.child_token();

    let (connection, connection_task) = ConnectionActor::spawn(
        connection_id,
        outbound_tx,
        cancel_token.clone(),
        Arc::clone(&state.metrics),
    );
    state.metrics.connection_opened();

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    info!(
        target: "venue.server",
        connection_id = %connection_id,
        role = identity.role.as_str(),
        client_type = ?kind.client_type(),
        "Connection opened"
    );

    let session = Session::new(
        identity,
        kind,
        connection,
        state.controller.clone(),
        Arc::clone(&state.store),
    );
    drive_session(ws_receiver, session, state.idle_timeout, &cancel_token).await;

    if let Err(e) = connection_task.await {
        warn!(target: "venue.server", connection_id = %connection_id, error = ?e, "Connection actor failed");
        state.metrics.record_panic(crate::actors::ActorType::Connection);
    }
    let _ = writer.await;
    state.metrics.connection_closed();

    info!(target: "venue.server", connection_id = %connection_id, "Connection closed");
}

/// Run `session` against the frames of `socket` until either side ends it,
/// then disconnect the session.
async fn drive_session<S>(
    socket: S,
    mut session: Session,
    idle_timeout: Duration,
    cancel_token: &CancellationToken,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Send + Unpin + 'static,
{
    let closed = cancel_token.child_token();
    let (request_tx, mut request_rx) = mpsc::channel(PENDING_REQUESTS);
    let reader = tokio::spawn(read_frames(
        socket,
        request_tx,
        closed.clone(),
        idle_timeout,
        session.connection_id(),
    ));

    loop {
        let text = tokio::select! {
            () = closed.cancelled() => break,
            text = request_rx.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };
        // In-flight requests end with the connection.
        tokio::select! {
            () = closed.cancelled() => break,
            () = session.handle_text(&text) => {}
        }
    }

    closed.cancel();
    session.on_disconnect().await;
    let _ = reader.await;
}

/// Queue text frames from `socket` for the session loop. Cancels `closed`
/// when the client goes away, idles out or overruns the request queue.
async fn read_frames<S>(
    mut socket: S,
    requests: mpsc::Sender<String>,
    closed: CancellationToken,
    idle_timeout: Duration,
    connection_id: ConnectionId,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            () = closed.cancelled() => break,
            next = tokio::time::timeout(idle_timeout, socket.next()) => next,
        };

        match next {
            Ok(Some(Ok(Message::Text(text)))) => match requests.try_send(text) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    metrics::record_protocol_violation("backlog");
                    warn!(
                        target: "venue.server",
                        connection_id = %connection_id,
                        pending = PENDING_REQUESTS,
                        "Request queue full, closing connection"
                    );
                    break;
                }
                Err(TrySendError::Closed(_)) => break,
            },
            Ok(Some(Ok(Message::Binary(_)))) => {
                metrics::record_protocol_violation("binary");
                debug!(target: "venue.server", connection_id = %connection_id, "Binary frame dropped");
            }
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
            Ok(Some(Ok(Message::Close(_))) | None) => {
                debug!(target: "venue.server", connection_id = %connection_id, "Client closed connection");
                break;
            }
            Ok(Some(Err(e))) => {
                debug!(target: "venue.server", connection_id = %connection_id, error = %e, "Socket error");
                break;
            }
            Err(_) => {
                info!(target: "venue.server", connection_id = %connection_id, "Idle timeout");
                break;
            }
        }
    }
    closed.cancel();
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::mock::MockMediaTransport;
    use crate::media::MediaTransport;
    use crate::store::memory::InMemoryVenueStore;
    use axum::body::Body;
    use axum::http::Request;
    use common::jwt::{encode_user_token, UserClaims};
    use common::secret::SecretString;
    use common::types::{Role, UserId};
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    const SECRET: &str = "server-test-secret";

    fn app(max_connections: usize) -> Router {
        let store: Arc<dyn VenueStore> = Arc::new(InMemoryVenueStore::new());
        let media: Arc<dyn MediaTransport> = Arc::new(MockMediaTransport::accepting());
        let metrics = ActorMetrics::new();
        let controller = VenueControllerHandle::new(
            "server-test".to_string(),
            Arc::clone(&store),
            media,
            Arc::clone(&metrics),
        );
        let validator =
            IdentityValidator::new(&SecretString::from(SECRET), Duration::from_secs(300));
        router(Arc::new(ServerState::new(
            controller,
            store,
            validator,
            metrics,
            max_connections,
            Duration::from_secs(64),
        )))
    }

    fn token() -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = UserClaims {
            uuid: UserId::new(),
            username: "ada".to_string(),
            role: Role::User,
            exp: now + 3600,
            iat: now,
        };
        encode_user_token(&claims, SECRET.as_bytes()).unwrap()
    }

    async fn status(app: Router, uri: &str, bearer: Option<&str>) -> StatusCode {
        let mut request = Request::builder().uri(uri);
        if let Some(token) = bearer {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        app.oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_missing_or_bad_token_is_forbidden() {
        assert_eq!(status(app(10), "/ws", None).await, StatusCode::FORBIDDEN);
        assert_eq!(
            status(app(10), "/ws?token=garbage", None).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status(app(10), "/ws", Some("a.b.c")).await,
            StatusCode::FORBIDDEN
        );
    }

    #[tokio::test]
    async fn test_valid_token_reaches_upgrade() {
        let uri = format!("/ws?token={}", token());
        assert_eq!(status(app(10), &uri, None).await, StatusCode::UPGRADE_REQUIRED);
        assert_eq!(
            status(app(10), "/ws", Some(&token())).await,
            StatusCode::UPGRADE_REQUIRED
        );
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let uri = format!("/ws?token={}", token());
        let response = app(0)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"Too many connections");
    }

    #[tokio::test]
    async fn test_sender_requires_sender_id() {
        let uri = format!("/ws?token={}&clientType=sender", token());
        assert_eq!(status(app(10), &uri, None).await, StatusCode::BAD_REQUEST);
    }

    type Frames = futures::channel::mpsc::UnboundedSender<Result<Message, axum::Error>>;

    struct Connected {
        store: Arc<InMemoryVenueStore>,
        frames: Frames,
        connection: crate::actors::ConnectionHandle,
        outbound: mpsc::Receiver<String>,
        driver: tokio::task::JoinHandle<()>,
    }

    fn connect(store: Arc<InMemoryVenueStore>, idle_timeout: Duration) -> Connected {
        let metrics = ActorMetrics::new();
        let controller = VenueControllerHandle::new(
            "server-test".to_string(),
            Arc::clone(&store) as Arc<dyn VenueStore>,
            Arc::new(MockMediaTransport::accepting()) as Arc<dyn MediaTransport>,
            Arc::clone(&metrics),
        );
        let identity = IdentityValidator::new(&SecretString::from(SECRET), Duration::from_secs(300))
            .validate(&token())
            .unwrap();

        let cancel_token = CancellationToken::new();
        let (outbound_tx, outbound) = mpsc::channel(16);
        let (connection, _task) =
            ConnectionActor::spawn(ConnectionId::new(), outbound_tx, cancel_token.clone(), metrics);
        let session = Session::new(
            identity,
            MemberKind::Receiver,
            connection.clone(),
            controller,
            Arc::clone(&store) as Arc<dyn VenueStore>,
        );

        let (frames, socket) = futures::channel::mpsc::unbounded();
        let driver = tokio::spawn(async move {
            drive_session(socket, session, idle_timeout, &cancel_token).await;
        });
        Connected {
            store,
            frames,
            connection,
            outbound,
            driver,
        }
    }

    #[tokio::test]
    async fn test_close_during_request_ends_session() {
        let store = Arc::new(InMemoryVenueStore::new());
        let venue_id = store.create_venue("hall", UserId::new()).await.unwrap();
        store.set_stalled(true);
        let c = connect(store, Duration::from_secs(60));

        let join = serde_json::json!({
            "type": "request",
            "id": "1",
            "subject": "venue.join",
            "data": { "venueId": venue_id },
        });
        c.frames
            .unbounded_send(Ok(Message::Text(join.to_string())))
            .unwrap();
        while c.store.stalled_calls() == 0 {
            tokio::task::yield_now().await;
        }

        // The store never answers, yet the close is seen right away.
        c.frames.unbounded_send(Ok(Message::Close(None))).unwrap();
        tokio::time::timeout(Duration::from_secs(1), c.driver)
            .await
            .expect("session outlived its connection")
            .unwrap();
        assert!(c.connection.is_cancelled());

        c.store.set_stalled(false);
    }

    #[tokio::test]
    async fn test_dropped_socket_ends_session() {
        let store = Arc::new(InMemoryVenueStore::new());
        let c = connect(store, Duration::from_secs(60));
        drop(c.frames);

        tokio::time::timeout(Duration::from_secs(1), c.driver)
            .await
            .expect("session outlived its connection")
            .unwrap();
        assert!(c.connection.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_times_out() {
        let store = Arc::new(InMemoryVenueStore::new());
        let mut c = connect(store, Duration::from_secs(5));

        let get_state = serde_json::json!({
            "type": "request",
            "id": "1",
            "subject": "session.getState",
        });
        c.frames
            .unbounded_send(Ok(Message::Text(get_state.to_string())))
            .unwrap();
        let response: serde_json::Value =
            serde_json::from_str(&c.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(response["wasSuccess"], true);

        tokio::time::timeout(Duration::from_secs(10), c.driver)
            .await
            .expect("idle connection was not closed")
            .unwrap();
        assert!(c.connection.is_cancelled());
    }

    #[test]
    fn test_member_kind() {
        let sender = ConnectParams {
            client_type: Some("sender".to_string()),
            sender_id: Some("cam-a".to_string()),
            ..ConnectParams::default()
        };
        assert_eq!(
            member_kind(&sender).unwrap(),
            MemberKind::Publisher {
                sender_id: SenderId::from("cam-a")
            }
        );
        assert_eq!(
            member_kind(&ConnectParams::default()).unwrap(),
            MemberKind::Receiver
        );
        let unknown = ConnectParams {
            client_type: Some("robot".to_string()),
            ..ConnectParams::default()
        };
        assert!(member_kind(&unknown).is_err());
    }
}
