//! Request dispatch: parse, guard, run, respond.

use super::procedures::{
    input, CameraIdInput, ConnectTransportInput, ConsumeInput, ConsumerIdInput,
    CreateCameraInput, DisplayNameInput, MainAudioInput, NameInput, PortalInput,
    PortalKeyInput, ProduceInput, ProducerIdInput, RtpCapabilitiesInput, SetSenderInput,
    UnsubscribeInput, UpdateCameraInput, VenueIdInput,
};
use super::{Procedure, Session};
use crate::actors::{Slot, VenueHandle};
use crate::auth::check_guards;
use crate::errors::VenueError;
use crate::media::TransportDirection;
use crate::observability::metrics;
use crate::protocol::{parse_request, Frame, Request};
use crate::venue::graph::Portal;
use crate::venue::policy::VenueUpdate;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

/// What a successful procedure produced.
enum Outcome {
    Data(Value),
    /// A slot was attached; the current snapshot follows the ack.
    Subscribed(Slot),
}

impl Session {
    /// Handle one inbound text frame. Protocol violations are logged and
    /// dropped; the connection stays open.
    pub async fn handle_text(&mut self, text: &str) {
        match parse_request(text) {
            Ok(request) => self.handle_request(request).await,
            Err(violation) => {
                metrics::record_protocol_violation(violation.as_str());
                warn!(
                    target: "venue.session",
                    connection_id = %self.connection_id,
                    reason = violation.as_str(),
                    "Dropped inbound frame"
                );
            }
        }
    }

    #[instrument(skip_all, name = "venue.session.request", fields(connection_id = %self.connection_id, subject = %request.subject))]
    pub async fn handle_request(&mut self, request: Request) {
        let start = Instant::now();
        let Request { id, subject, data } = request;

        let Some(procedure) = Procedure::from_subject(&subject) else {
            metrics::record_protocol_violation("unknown_subject");
            let error = VenueError::InvalidInput(format!("Unknown procedure: {subject}"));
            self.reply(Frame::failure(id, subject, &error)).await;
            return;
        };

        let result = match check_guards(procedure.guards(), &self.guard_context()).await {
            Ok(()) => self.run(procedure, &id, data).await,
            Err(e) => Err(e),
        };
        metrics::record_request_latency(procedure.subject(), result.is_ok(), start.elapsed());

        match result {
            Ok(Outcome::Data(data)) => {
                self.reply(Frame::success(id, subject, data)).await;
            }
            Ok(Outcome::Subscribed(slot)) => {
                self.reply(Frame::success(id, subject, Value::Null)).await;
                if let Some(venue) = self.venue() {
                    if let Err(e) = venue.resend(self.connection_id, slot).await {
                        debug!(
                            target: "venue.session",
                            connection_id = %self.connection_id,
                            slot = slot.as_str(),
                            error = %e,
                            "Initial snapshot not sent"
                        );
                    }
                }
            }
            Err(e) => {
                metrics::record_error(e.kind());
                match &e {
                    VenueError::Store(_)
                    | VenueError::Media(_)
                    | VenueError::Config(_)
                    | VenueError::Internal(_) => {
                        error!(
                            target: "venue.session",
                            connection_id = %self.connection_id,
                            subject = procedure.subject(),
                            error = %e,
                            "Procedure failed"
                        );
                    }
                    _ => {
                        debug!(
                            target: "venue.session",
                            connection_id = %self.connection_id,
                            subject = procedure.subject(),
                            error_code = e.error_code(),
                            error = %e,
                            "Procedure rejected"
                        );
                    }
                }
                self.reply(Frame::failure(id, subject, &e)).await;
            }
        }
    }

    async fn reply(&self, frame: Frame) {
        if let Err(e) = self.connection.respond(frame).await {
            error!(
                target: "venue.session",
                connection_id = %self.connection_id,
                error = %e,
                "Send to inactive session ignored"
            );
        }
    }

    fn current_venue(&self) -> Result<VenueHandle, VenueError> {
        self.require_venue().cloned()
    }

    async fn run(
        &mut self,
        procedure: Procedure,
        request_id: &str,
        data: Value,
    ) -> Result<Outcome, VenueError> {
        let conn = self.connection_id;
        let value = match procedure {
            Procedure::SetDisplayName => {
                let DisplayNameInput { username } = input(data)?;
                self.set_display_name(username).await?;
                Value::Null
            }
            Procedure::GetState => to_payload(&self.state().await)?,
            Procedure::Subscribe(slot) => {
                self.connection
                    .subscribe(slot, request_id.to_string())
                    .await?;
                return Ok(Outcome::Subscribed(slot));
            }
            Procedure::Unsubscribe => {
                let UnsubscribeInput { slot } = input(data)?;
                let slot = Slot::from_subject(&slot)
                    .ok_or_else(|| VenueError::InvalidInput(format!("Unknown slot: {slot}")))?;
                self.connection.unsubscribe(slot).await?;
                Value::Null
            }

            Procedure::CreateVenue => {
                let NameInput { name } = input(data)?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(VenueError::InvalidInput(
                        "Venue name must not be empty".to_string(),
                    ));
                }
                let venue_id = self
                    .store
                    .create_venue(name, self.identity.user_id)
                    .await?;
                json!({ "venueId": venue_id })
            }
            Procedure::DeleteVenue => {
                let VenueIdInput { venue_id } = input(data)?;
                self.controller
                    .delete_venue(venue_id, self.requester())
                    .await?;
                Value::Null
            }
            Procedure::ListMyVenues => {
                to_payload(&self.store.list_owned_venues(self.identity.user_id).await?)?
            }
            Procedure::ListLoadedVenues => to_payload(&self.controller.list_loaded().await?)?,
            Procedure::LoadVenue => {
                let VenueIdInput { venue_id } = input(data)?;
                self.controller
                    .load_venue(venue_id, self.requester())
                    .await?;
                json!({ "venueId": venue_id })
            }
            Procedure::LoadAndJoinVenue | Procedure::JoinVenue => {
                let VenueIdInput { venue_id } = input(data)?;
                to_payload(&self.join_venue(venue_id).await?)?
            }
            Procedure::LeaveVenue => {
                self.leave_venue().await?;
                Value::Null
            }
            Procedure::UpdateVenue => {
                let update: VenueUpdate = input(data)?;
                to_payload(&self.current_venue()?.update(update).await?)?
            }
            Procedure::GetPublicState => to_payload(&self.current_venue()?.public_state().await?)?,
            Procedure::GetAdminState => to_payload(&self.current_venue()?.admin_state().await?)?,

            Procedure::CreateCamera => {
                let CreateCameraInput { name, sender_id } = input(data)?;
                let camera = self
                    .current_venue()?
                    .create_camera(name, sender_id)
                    .await?;
                json!({ "cameraId": camera.id })
            }
            Procedure::UpdateCamera => {
                let (camera_id, update) = input::<UpdateCameraInput>(data)?.into_parts();
                self.current_venue()?
                    .update_camera(camera_id, update)
                    .await?;
                Value::Null
            }
            Procedure::DeleteCamera => {
                let CameraIdInput { camera_id } = input(data)?;
                self.current_venue()?.delete_camera(camera_id).await?;
                Value::Null
            }
            Procedure::SetCameraPortal => {
                let PortalInput {
                    from_camera_id,
                    to_camera_id,
                    x,
                    y,
                    distance,
                } = input(data)?;
                let portal = Portal::new(x, y, distance)?;
                self.current_venue()?
                    .upsert_portal(from_camera_id, to_camera_id, portal)
                    .await?;
                Value::Null
            }
            Procedure::DeleteCameraPortal => {
                let PortalKeyInput {
                    from_camera_id,
                    to_camera_id,
                } = input(data)?;
                self.current_venue()?
                    .delete_portal(from_camera_id, to_camera_id)
                    .await?;
                Value::Null
            }
            Procedure::SetSenderForCamera => {
                let SetSenderInput {
                    sender_id,
                    camera_id,
                } = input(data)?;
                self.current_venue()?
                    .set_sender_for_camera(sender_id, camera_id)
                    .await?;
                Value::Null
            }
            Procedure::SetMainAudioCamera => {
                let MainAudioInput { camera_id } = input(data)?;
                self.current_venue()?
                    .set_main_audio_camera(camera_id)
                    .await?;
                Value::Null
            }
            Procedure::JoinCamera => {
                let CameraIdInput { camera_id } = input(data)?;
                to_payload(&self.current_venue()?.join_camera(conn, camera_id).await?)?
            }
            Procedure::LeaveCamera => {
                self.current_venue()?.leave_camera(conn).await?;
                Value::Null
            }
            Procedure::GetCameraState => {
                to_payload(&self.current_venue()?.camera_state(conn).await?)?
            }

            Procedure::EnterSubSpace => {
                self.current_venue()?.enter_subspace(conn).await?;
                Value::Null
            }
            Procedure::LeaveSubSpace => {
                self.current_venue()?.leave_subspace(conn).await?;
                Value::Null
            }

            Procedure::GetRouterRtpCapabilities => {
                self.current_venue()?.router_capabilities().await?
            }
            Procedure::SetRtpCapabilities => {
                let RtpCapabilitiesInput { rtp_capabilities } = input(data)?;
                self.current_venue()?
                    .set_rtp_capabilities(conn, rtp_capabilities)
                    .await?;
                Value::Null
            }
            Procedure::CreateSendTransport => to_payload(
                &self
                    .current_venue()?
                    .create_transport(conn, TransportDirection::Send)
                    .await?,
            )?,
            Procedure::CreateReceiveTransport => to_payload(
                &self
                    .current_venue()?
                    .create_transport(conn, TransportDirection::Receive)
                    .await?,
            )?,
            Procedure::ConnectTransport => {
                let ConnectTransportInput {
                    transport_id,
                    dtls_parameters,
                } = input(data)?;
                self.current_venue()?
                    .connect_transport(conn, transport_id, dtls_parameters)
                    .await?;
                Value::Null
            }
            Procedure::CreateProducer => {
                let ProduceInput {
                    transport_id,
                    kind,
                    rtp_parameters,
                } = input(data)?;
                let producer_id = self
                    .current_venue()?
                    .create_producer(conn, transport_id, kind, rtp_parameters)
                    .await?;
                json!({ "producerId": producer_id })
            }
            Procedure::CreateConsumer => {
                let ConsumeInput {
                    transport_id,
                    producer_id,
                } = input(data)?;
                to_payload(
                    &self
                        .current_venue()?
                        .create_consumer(conn, transport_id, producer_id)
                        .await?,
                )?
            }
            Procedure::CloseProducer => {
                let ProducerIdInput { producer_id } = input(data)?;
                self.current_venue()?
                    .close_producer(conn, producer_id)
                    .await?;
                Value::Null
            }
            Procedure::CloseConsumer => {
                let ConsumerIdInput { consumer_id } = input(data)?;
                self.current_venue()?
                    .close_consumer(conn, consumer_id)
                    .await?;
                Value::Null
            }
        };
        Ok(Outcome::Data(value))
    }
}

fn to_payload<T: Serialize>(value: &T) -> Result<Value, VenueError> {
    serde_json::to_value(value)
        .map_err(|e| VenueError::Internal(format!("failed to serialize result: {e}")))
}
