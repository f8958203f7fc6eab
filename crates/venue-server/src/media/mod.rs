//! Media-transport collaborator seam.
//!
//! The venue server never touches media. It asks the collaborator (an SFU)
//! for one router per loaded venue and, through it, for transports, producers
//! and consumers. Capability and parameter blobs are passed through as opaque
//! JSON; only the returned ids are tracked.

pub mod http;

use crate::errors::VenueError;
use common::types::VenueId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

opaque_id!(
    /// Transport id assigned by the collaborator.
    TransportId
);
opaque_id!(
    /// Producer id assigned by the collaborator.
    ProducerId
);
opaque_id!(
    /// Consumer id assigned by the collaborator.
    ConsumerId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Receive,
}

/// Connection parameters for a newly created transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportInfo {
    pub id: TransportId,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerInfo {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

/// Creates per-venue routers.
#[async_trait::async_trait]
pub trait MediaTransport: Send + Sync {
    async fn create_router(&self, venue_id: VenueId) -> Result<Arc<dyn MediaRouter>, VenueError>;
}

/// One venue's router on the collaborator.
#[async_trait::async_trait]
pub trait MediaRouter: Send + Sync {
    fn id(&self) -> &str;

    /// RTP capabilities clients need before creating a device.
    fn rtp_capabilities(&self) -> Value;

    async fn create_transport(
        &self,
        direction: TransportDirection,
    ) -> Result<TransportInfo, VenueError>;

    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: Value,
    ) -> Result<(), VenueError>;

    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<ProducerId, VenueError>;

    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &Value,
    ) -> Result<ConsumerInfo, VenueError>;

    async fn close_producer(&self, producer_id: &ProducerId) -> Result<(), VenueError>;

    async fn close_consumer(&self, consumer_id: &ConsumerId) -> Result<(), VenueError>;

    /// Closes the transport and everything produced or consumed on it.
    async fn close_transport(&self, transport_id: &TransportId) -> Result<(), VenueError>;

    /// Closes the router and all of its transports.
    async fn close(&self) -> Result<(), VenueError>;
}

/// Mock collaborator for tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock transport counting router creations.
    #[derive(Default)]
    pub struct MockMediaTransport {
        routers_created: AtomicUsize,
        return_error: bool,
        delay: Option<Duration>,
        routers: Mutex<Vec<Arc<MockRouter>>>,
    }

    impl MockMediaTransport {
        /// Create a mock that always succeeds.
        pub fn accepting() -> Self {
            Self::default()
        }

        /// Create a mock whose router creation always fails.
        pub fn failing() -> Self {
            Self {
                return_error: true,
                ..Self::default()
            }
        }

        /// Create a mock that waits before answering `create_router`.
        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn routers_created(&self) -> usize {
            self.routers_created.load(Ordering::SeqCst)
        }

        /// Routers handed out so far, in creation order.
        pub fn routers(&self) -> Vec<Arc<MockRouter>> {
            self.routers
                .lock()
                .map(|r| r.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait::async_trait]
    impl MediaTransport for MockMediaTransport {
        async fn create_router(
            &self,
            venue_id: VenueId,
        ) -> Result<Arc<dyn MediaRouter>, VenueError> {
            let count = self.routers_created.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.return_error {
                return Err(VenueError::Media("Mock media collaborator error".to_string()));
            }

            let router = Arc::new(MockRouter::new(format!("router-{venue_id}-{count}")));
            if let Ok(mut routers) = self.routers.lock() {
                routers.push(Arc::clone(&router));
            }
            Ok(router as Arc<dyn MediaRouter>)
        }
    }

    /// Mock router that hands out sequential ids and counts calls.
    pub struct MockRouter {
        id: String,
        next_id: AtomicUsize,
        closed: AtomicBool,
        close_calls: AtomicUsize,
        closed_producers: Mutex<Vec<ProducerId>>,
        closed_consumers: Mutex<Vec<ConsumerId>>,
        closed_transports: Mutex<Vec<TransportId>>,
    }

    impl MockRouter {
        fn new(id: String) -> Self {
            Self {
                id,
                next_id: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                close_calls: AtomicUsize::new(0),
                closed_producers: Mutex::new(Vec::new()),
                closed_consumers: Mutex::new(Vec::new()),
                closed_transports: Mutex::new(Vec::new()),
            }
        }

        fn next(&self, prefix: &str) -> String {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            format!("{prefix}-{n}")
        }

        fn ensure_open(&self) -> Result<(), VenueError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(VenueError::Media(format!("router {} is closed", self.id)));
            }
            Ok(())
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        pub fn close_calls(&self) -> usize {
            self.close_calls.load(Ordering::SeqCst)
        }

        pub fn closed_consumers(&self) -> Vec<ConsumerId> {
            self.closed_consumers
                .lock()
                .map(|c| c.clone())
                .unwrap_or_default()
        }

        pub fn closed_producers(&self) -> Vec<ProducerId> {
            self.closed_producers
                .lock()
                .map(|c| c.clone())
                .unwrap_or_default()
        }

        pub fn closed_transports(&self) -> Vec<TransportId> {
            self.closed_transports
                .lock()
                .map(|c| c.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait::async_trait]
    impl MediaRouter for MockRouter {
        fn id(&self) -> &str {
            &self.id
        }

        fn rtp_capabilities(&self) -> Value {
            serde_json::json!({ "codecs": [{ "mimeType": "audio/opus" }, { "mimeType": "video/VP8" }] })
        }

        async fn create_transport(
            &self,
            _direction: TransportDirection,
        ) -> Result<TransportInfo, VenueError> {
            self.ensure_open()?;
            Ok(TransportInfo {
                id: TransportId(self.next("transport")),
                ice_parameters: serde_json::json!({}),
                ice_candidates: serde_json::json!([]),
                dtls_parameters: serde_json::json!({}),
            })
        }

        async fn connect_transport(
            &self,
            _transport_id: &TransportId,
            _dtls_parameters: Value,
        ) -> Result<(), VenueError> {
            self.ensure_open()
        }

        async fn produce(
            &self,
            _transport_id: &TransportId,
            _kind: MediaKind,
            _rtp_parameters: Value,
        ) -> Result<ProducerId, VenueError> {
            self.ensure_open()?;
            Ok(ProducerId(self.next("producer")))
        }

        async fn consume(
            &self,
            _transport_id: &TransportId,
            producer_id: &ProducerId,
            _rtp_capabilities: &Value,
        ) -> Result<ConsumerInfo, VenueError> {
            self.ensure_open()?;
            Ok(ConsumerInfo {
                id: ConsumerId(self.next("consumer")),
                producer_id: producer_id.clone(),
                kind: MediaKind::Video,
                rtp_parameters: serde_json::json!({}),
            })
        }

        async fn close_producer(&self, producer_id: &ProducerId) -> Result<(), VenueError> {
            if let Ok(mut closed) = self.closed_producers.lock() {
                closed.push(producer_id.clone());
            }
            Ok(())
        }

        async fn close_consumer(&self, consumer_id: &ConsumerId) -> Result<(), VenueError> {
            if let Ok(mut closed) = self.closed_consumers.lock() {
                closed.push(consumer_id.clone());
            }
            Ok(())
        }

        async fn close_transport(&self, transport_id: &TransportId) -> Result<(), VenueError> {
            if let Ok(mut closed) = self.closed_transports.lock() {
                closed.push(transport_id.clone());
            }
            Ok(())
        }

        async fn close(&self) -> Result<(), VenueError> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::mock::MockMediaTransport;
    use super::*;

    #[test]
    fn test_transport_info_wire_shape() {
        let info = TransportInfo {
            id: TransportId::from("t-1"),
            ice_parameters: serde_json::json!({"usernameFragment": "u"}),
            ice_candidates: serde_json::json!([]),
            dtls_parameters: serde_json::json!({"role": "auto"}),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["id"], "t-1");
        assert!(json.get("iceParameters").is_some());
        assert!(json.get("dtlsParameters").is_some());
    }

    #[tokio::test]
    async fn test_mock_counts_router_creations() {
        let media = MockMediaTransport::accepting();
        let router = media.create_router(VenueId::new()).await.unwrap();
        assert_eq!(media.routers_created(), 1);

        let transport = router.create_transport(TransportDirection::Send).await.unwrap();
        let producer = router
            .produce(&transport.id, MediaKind::Audio, serde_json::json!({}))
            .await
            .unwrap();
        assert!(producer.0.starts_with("producer-"));

        router.close().await.unwrap();
        assert!(media.routers()[0].is_closed());
        assert!(router.create_transport(TransportDirection::Receive).await.is_err());
    }

    #[tokio::test]
    async fn test_failing_mock() {
        let media = MockMediaTransport::failing();
        let result = media.create_router(VenueId::new()).await;
        assert!(matches!(result, Err(VenueError::Media(_))));
        assert_eq!(media.routers_created(), 1);
    }
}
