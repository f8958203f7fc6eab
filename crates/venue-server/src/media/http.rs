//! HTTP client for the media-transport collaborator.
//!
//! Routes (all JSON, relative to `MEDIA_HANDLER_URL`):
//!
//! | Call | Route |
//! |------|-------|
//! | create router | `POST /routers` |
//! | create transport | `POST /routers/{router}/transports` |
//! | connect transport | `POST /routers/{router}/transports/{transport}/connect` |
//! | produce | `POST /routers/{router}/transports/{transport}/producers` |
//! | consume | `POST /routers/{router}/transports/{transport}/consumers` |
//! | close producer/consumer/transport | `DELETE /routers/{router}/{kind}/{id}` |
//! | close router | `DELETE /routers/{router}` |
//!
//! Non-success statuses become `VenueError::Media`; details are logged, not
//! returned to clients.

use super::{
    ConsumerInfo, ConsumerId, MediaKind, MediaRouter, MediaTransport, ProducerId,
    TransportDirection, TransportId, TransportInfo,
};
use crate::errors::VenueError;
use crate::observability::metrics;
use common::types::VenueId;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{instrument, warn};

/// Default timeout for collaborator requests in seconds.
const MEDIA_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRouterRequest {
    venue_id: VenueId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRouterResponse {
    router_id: String,
    rtp_capabilities: Value,
}

#[derive(Debug, Serialize)]
struct CreateTransportRequest {
    direction: TransportDirection,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectTransportRequest {
    dtls_parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProduceRequest {
    kind: MediaKind,
    rtp_parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ProduceResponse {
    id: ProducerId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConsumeRequest<'a> {
    producer_id: &'a ProducerId,
    rtp_capabilities: &'a Value,
}

/// Creates routers on a remote media handler.
#[derive(Clone)]
pub struct HttpMediaTransport {
    client: Client,
    base_url: String,
}

impl HttpMediaTransport {
    /// # Errors
    ///
    /// Returns `VenueError::Internal` if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, VenueError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(MEDIA_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                tracing::error!(target: "venue.media", error = %e, "Failed to build HTTP client");
                VenueError::Internal(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl MediaTransport for HttpMediaTransport {
    #[instrument(skip_all, name = "media.create_router", fields(venue_id = %venue_id))]
    async fn create_router(&self, venue_id: VenueId) -> Result<Arc<dyn MediaRouter>, VenueError> {
        let start = Instant::now();
        let url = format!("{}/routers", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&CreateRouterRequest { venue_id })
            .send()
            .await
            .map_err(request_failed)?;
        let created: CreateRouterResponse = json_body(response).await?;
        metrics::record_media_latency("create_router", start.elapsed());

        Ok(Arc::new(HttpMediaRouter {
            client: self.client.clone(),
            router_url: format!("{}/routers/{}", self.base_url, created.router_id),
            id: created.router_id,
            rtp_capabilities: created.rtp_capabilities,
        }))
    }
}

/// Handle to one router on the remote media handler.
pub struct HttpMediaRouter {
    client: Client,
    router_url: String,
    id: String,
    rtp_capabilities: Value,
}

impl HttpMediaRouter {
    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> Result<T, VenueError> {
        let start = Instant::now();
        let response = self
            .client
            .post(format!("{}{path}", self.router_url))
            .json(body)
            .send()
            .await
            .map_err(request_failed)?;
        let result = json_body(response).await;
        metrics::record_media_latency(operation, start.elapsed());
        result
    }

    async fn post_no_content<B: Serialize + Sync>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> Result<(), VenueError> {
        let start = Instant::now();
        let response = self
            .client
            .post(format!("{}{path}", self.router_url))
            .json(body)
            .send()
            .await
            .map_err(request_failed)?;
        let result = check_status(response).map(|_| ());
        metrics::record_media_latency(operation, start.elapsed());
        result
    }

    async fn delete(&self, operation: &'static str, path: &str) -> Result<(), VenueError> {
        let start = Instant::now();
        let response = self
            .client
            .delete(format!("{}{path}", self.router_url))
            .send()
            .await
            .map_err(request_failed)?;
        let result = check_status(response).map(|_| ());
        metrics::record_media_latency(operation, start.elapsed());
        result
    }
}

#[async_trait::async_trait]
impl MediaRouter for HttpMediaRouter {
    fn id(&self) -> &str {
        &self.id
    }

    fn rtp_capabilities(&self) -> Value {
        self.rtp_capabilities.clone()
    }

    #[instrument(skip_all, name = "media.create_transport", fields(router_id = %self.id))]
    async fn create_transport(
        &self,
        direction: TransportDirection,
    ) -> Result<TransportInfo, VenueError> {
        self.post(
            "create_transport",
            "/transports",
            &CreateTransportRequest { direction },
        )
        .await
    }

    #[instrument(skip_all, name = "media.connect_transport", fields(router_id = %self.id, transport_id = %transport_id))]
    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: Value,
    ) -> Result<(), VenueError> {
        self.post_no_content(
            "connect_transport",
            &format!("/transports/{transport_id}/connect"),
            &ConnectTransportRequest { dtls_parameters },
        )
        .await
    }

    #[instrument(skip_all, name = "media.produce", fields(router_id = %self.id, transport_id = %transport_id))]
    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<ProducerId, VenueError> {
        let produced: ProduceResponse = self
            .post(
                "produce",
                &format!("/transports/{transport_id}/producers"),
                &ProduceRequest {
                    kind,
                    rtp_parameters,
                },
            )
            .await?;
        Ok(produced.id)
    }

    #[instrument(skip_all, name = "media.consume", fields(router_id = %self.id, producer_id = %producer_id))]
    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &Value,
    ) -> Result<ConsumerInfo, VenueError> {
        self.post(
            "consume",
            &format!("/transports/{transport_id}/consumers"),
            &ConsumeRequest {
                producer_id,
                rtp_capabilities,
            },
        )
        .await
    }

    async fn close_producer(&self, producer_id: &ProducerId) -> Result<(), VenueError> {
        self.delete("close_producer", &format!("/producers/{producer_id}"))
            .await
    }

    async fn close_consumer(&self, consumer_id: &ConsumerId) -> Result<(), VenueError> {
        self.delete("close_consumer", &format!("/consumers/{consumer_id}"))
            .await
    }

    async fn close_transport(&self, transport_id: &TransportId) -> Result<(), VenueError> {
        self.delete("close_transport", &format!("/transports/{transport_id}"))
            .await
    }

    #[instrument(skip_all, name = "media.close_router", fields(router_id = %self.id))]
    async fn close(&self) -> Result<(), VenueError> {
        self.delete("close_router", "").await
    }
}

fn request_failed(e: reqwest::Error) -> VenueError {
    warn!(target: "venue.media", error = %e, "Media handler request failed");
    VenueError::Media("media handler is unavailable".to_string())
}

fn check_status(response: Response) -> Result<Response, VenueError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        warn!(target: "venue.media", status = %status, url = %response.url(), "Media handler returned error status");
        Err(VenueError::Media(format!("media handler returned {status}")))
    }
}

async fn json_body<T: DeserializeOwned>(response: Response) -> Result<T, VenueError> {
    check_status(response)?.json().await.map_err(|e| {
        warn!(target: "venue.media", error = %e, "Failed to parse media handler response");
        VenueError::Media("unexpected media handler response".to_string())
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn router_on(server: &MockServer) -> Arc<dyn MediaRouter> {
        Mock::given(method("POST"))
            .and(path("/routers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "routerId": "r1",
                "rtpCapabilities": {"codecs": []}
            })))
            .mount(server)
            .await;

        HttpMediaTransport::new(&server.uri())
            .unwrap()
            .create_router(VenueId::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_router_and_transport() {
        let server = MockServer::start().await;
        let router = router_on(&server).await;
        assert_eq!(router.id(), "r1");
        assert_eq!(router.rtp_capabilities(), serde_json::json!({"codecs": []}));

        Mock::given(method("POST"))
            .and(path("/routers/r1/transports"))
            .and(body_partial_json(serde_json::json!({"direction": "send"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "t1",
                "iceParameters": {},
                "iceCandidates": [],
                "dtlsParameters": {}
            })))
            .mount(&server)
            .await;

        let transport = router.create_transport(TransportDirection::Send).await.unwrap();
        assert_eq!(transport.id, TransportId::from("t1"));
    }

    #[tokio::test]
    async fn test_produce_returns_producer_id() {
        let server = MockServer::start().await;
        let router = router_on(&server).await;

        Mock::given(method("POST"))
            .and(path("/routers/r1/transports/t1/producers"))
            .and(body_partial_json(serde_json::json!({"kind": "audio"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "p1"})))
            .mount(&server)
            .await;

        let producer = router
            .produce(&TransportId::from("t1"), MediaKind::Audio, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(producer, ProducerId::from("p1"));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_media_error() {
        let server = MockServer::start().await;
        let router = router_on(&server).await;

        Mock::given(method("DELETE"))
            .and(path("/routers/r1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = router.close().await;
        assert!(matches!(result, Err(VenueError::Media(_))));
    }

    #[tokio::test]
    async fn test_unreachable_handler_is_media_error() {
        let transport = HttpMediaTransport::new("http://127.0.0.1:1").unwrap();
        let result = transport.create_router(VenueId::new()).await;
        assert!(matches!(result, Err(VenueError::Media(_))));
    }
}
