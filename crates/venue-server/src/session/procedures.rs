//! Procedure table: request subjects, their guard chains and input payloads.

use crate::actors::Slot;
use crate::auth::Guard;
use crate::errors::VenueError;
use crate::media::{ConsumerId, MediaKind, ProducerId, TransportId};
use crate::store::CameraUpdate;
use crate::venue::policy::double_option;
use common::types::{CameraId, Role, SenderId, VenueId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

const MODERATOR: Guard = Guard::RoleAtLeast(Role::Moderator);

/// Guards shared by every venue-editing procedure.
const VENUE_ADMIN: &[Guard] = &[
    Guard::ReceiverSession,
    Guard::MemberOfVenue,
    MODERATOR,
    Guard::OwnerOfVenue,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Procedure {
    SetDisplayName,
    GetState,
    Unsubscribe,
    Subscribe(Slot),

    CreateVenue,
    DeleteVenue,
    ListMyVenues,
    ListLoadedVenues,
    LoadVenue,
    LoadAndJoinVenue,
    JoinVenue,
    LeaveVenue,
    UpdateVenue,
    GetPublicState,
    GetAdminState,

    CreateCamera,
    UpdateCamera,
    DeleteCamera,
    SetCameraPortal,
    DeleteCameraPortal,
    SetSenderForCamera,
    SetMainAudioCamera,
    JoinCamera,
    LeaveCamera,
    GetCameraState,

    EnterSubSpace,
    LeaveSubSpace,

    GetRouterRtpCapabilities,
    SetRtpCapabilities,
    CreateSendTransport,
    CreateReceiveTransport,
    ConnectTransport,
    CreateProducer,
    CreateConsumer,
    CloseProducer,
    CloseConsumer,
}

impl Procedure {
    const ALL: [Procedure; 35] = [
        Procedure::SetDisplayName,
        Procedure::GetState,
        Procedure::Unsubscribe,
        Procedure::CreateVenue,
        Procedure::DeleteVenue,
        Procedure::ListMyVenues,
        Procedure::ListLoadedVenues,
        Procedure::LoadVenue,
        Procedure::LoadAndJoinVenue,
        Procedure::JoinVenue,
        Procedure::LeaveVenue,
        Procedure::UpdateVenue,
        Procedure::GetPublicState,
        Procedure::GetAdminState,
        Procedure::CreateCamera,
        Procedure::UpdateCamera,
        Procedure::DeleteCamera,
        Procedure::SetCameraPortal,
        Procedure::DeleteCameraPortal,
        Procedure::SetSenderForCamera,
        Procedure::SetMainAudioCamera,
        Procedure::JoinCamera,
        Procedure::LeaveCamera,
        Procedure::GetCameraState,
        Procedure::EnterSubSpace,
        Procedure::LeaveSubSpace,
        Procedure::GetRouterRtpCapabilities,
        Procedure::SetRtpCapabilities,
        Procedure::CreateSendTransport,
        Procedure::CreateReceiveTransport,
        Procedure::ConnectTransport,
        Procedure::CreateProducer,
        Procedure::CreateConsumer,
        Procedure::CloseProducer,
        Procedure::CloseConsumer,
    ];

    /// Look up the procedure for a request subject. Slot subjects open a
    /// subscription.
    #[must_use]
    pub fn from_subject(subject: &str) -> Option<Self> {
        Slot::from_subject(subject)
            .map(Procedure::Subscribe)
            .or_else(|| Self::ALL.into_iter().find(|p| p.subject() == subject))
    }

    #[must_use]
    pub const fn subject(&self) -> &'static str {
        match self {
            Procedure::SetDisplayName => "session.setDisplayName",
            Procedure::GetState => "session.getState",
            Procedure::Unsubscribe => "session.unsubscribe",
            Procedure::Subscribe(slot) => slot.subject(),
            Procedure::CreateVenue => "venue.create",
            Procedure::DeleteVenue => "venue.delete",
            Procedure::ListMyVenues => "venue.listMine",
            Procedure::ListLoadedVenues => "venue.listLoaded",
            Procedure::LoadVenue => "venue.load",
            Procedure::LoadAndJoinVenue => "venue.loadAndJoin",
            Procedure::JoinVenue => "venue.join",
            Procedure::LeaveVenue => "venue.leave",
            Procedure::UpdateVenue => "venue.update",
            Procedure::GetPublicState => "venue.getState",
            Procedure::GetAdminState => "venue.getAdminState",
            Procedure::CreateCamera => "camera.create",
            Procedure::UpdateCamera => "camera.update",
            Procedure::DeleteCamera => "camera.delete",
            Procedure::SetCameraPortal => "camera.setPortal",
            Procedure::DeleteCameraPortal => "camera.deletePortal",
            Procedure::SetSenderForCamera => "camera.setSender",
            Procedure::SetMainAudioCamera => "camera.setMainAudio",
            Procedure::JoinCamera => "camera.join",
            Procedure::LeaveCamera => "camera.leave",
            Procedure::GetCameraState => "camera.getState",
            Procedure::EnterSubSpace => "subspace.enter",
            Procedure::LeaveSubSpace => "subspace.leave",
            Procedure::GetRouterRtpCapabilities => "media.getRouterRtpCapabilities",
            Procedure::SetRtpCapabilities => "media.setRtpCapabilities",
            Procedure::CreateSendTransport => "media.createSendTransport",
            Procedure::CreateReceiveTransport => "media.createReceiveTransport",
            Procedure::ConnectTransport => "media.connectTransport",
            Procedure::CreateProducer => "media.createProducer",
            Procedure::CreateConsumer => "media.createConsumer",
            Procedure::CloseProducer => "media.closeProducer",
            Procedure::CloseConsumer => "media.closeConsumer",
        }
    }

    /// Guards evaluated, in order, before the procedure runs.
    #[must_use]
    pub fn guards(&self) -> &'static [Guard] {
        match self {
            Procedure::SetDisplayName
            | Procedure::GetState
            | Procedure::Unsubscribe
            | Procedure::ListLoadedVenues
            | Procedure::JoinVenue => &[],

            Procedure::CreateVenue | Procedure::DeleteVenue => {
                &[MODERATOR, Guard::ReceiverSession]
            }
            Procedure::ListMyVenues | Procedure::LoadVenue | Procedure::LoadAndJoinVenue => {
                &[MODERATOR]
            }

            Procedure::LeaveVenue
            | Procedure::GetPublicState
            | Procedure::GetRouterRtpCapabilities
            | Procedure::ConnectTransport
            | Procedure::Subscribe(Slot::VenueState) => &[Guard::MemberOfVenue],
            Procedure::GetAdminState | Procedure::Subscribe(Slot::AdminState) => {
                &[Guard::MemberOfVenue, MODERATOR]
            }

            Procedure::UpdateVenue
            | Procedure::CreateCamera
            | Procedure::UpdateCamera
            | Procedure::DeleteCamera
            | Procedure::SetCameraPortal
            | Procedure::DeleteCameraPortal
            | Procedure::SetSenderForCamera
            | Procedure::SetMainAudioCamera => VENUE_ADMIN,

            Procedure::JoinCamera
            | Procedure::EnterSubSpace
            | Procedure::LeaveSubSpace
            | Procedure::SetRtpCapabilities
            | Procedure::CreateReceiveTransport
            | Procedure::CreateConsumer
            | Procedure::CloseConsumer
            | Procedure::Subscribe(Slot::CameraState | Slot::SubSpaceState) => {
                &[Guard::ReceiverSession, Guard::MemberOfVenue]
            }
            Procedure::LeaveCamera | Procedure::GetCameraState => &[
                Guard::ReceiverSession,
                Guard::MemberOfVenue,
                Guard::InCamera,
            ],

            Procedure::CreateSendTransport
            | Procedure::CreateProducer
            | Procedure::CloseProducer => &[Guard::PublisherSession, Guard::MemberOfVenue],
        }
    }
}

/// Decode a request payload.
pub fn input<T: DeserializeOwned>(data: Value) -> Result<T, VenueError> {
    Ok(serde_json::from_value(data)?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayNameInput {
    pub username: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueIdInput {
    pub venue_id: VenueId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameInput {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraIdInput {
    pub camera_id: CameraId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCameraInput {
    pub name: String,
    #[serde(default)]
    pub sender_id: Option<SenderId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCameraInput {
    pub camera_id: CameraId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub sender_id: Option<Option<SenderId>>,
}

impl UpdateCameraInput {
    #[must_use]
    pub fn into_parts(self) -> (CameraId, CameraUpdate) {
        (
            self.camera_id,
            CameraUpdate {
                name: self.name,
                sender_id: self.sender_id,
            },
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalInput {
    pub from_camera_id: CameraId,
    pub to_camera_id: CameraId,
    pub x: f64,
    pub y: f64,
    pub distance: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalKeyInput {
    pub from_camera_id: CameraId,
    pub to_camera_id: CameraId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSenderInput {
    pub sender_id: SenderId,
    pub camera_id: CameraId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainAudioInput {
    #[serde(default)]
    pub camera_id: Option<CameraId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilitiesInput {
    pub rtp_capabilities: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportInput {
    pub transport_id: TransportId,
    pub dtls_parameters: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceInput {
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeInput {
    pub transport_id: TransportId,
    pub producer_id: ProducerId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerIdInput {
    pub producer_id: ProducerId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerIdInput {
    pub consumer_id: ConsumerId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeInput {
    /// Subject of the slot to detach.
    pub slot: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_subject_resolves_to_itself() {
        for procedure in Procedure::ALL {
            assert_eq!(Procedure::from_subject(procedure.subject()), Some(procedure));
        }
        for slot in Slot::ALL {
            assert_eq!(
                Procedure::from_subject(slot.subject()),
                Some(Procedure::Subscribe(slot))
            );
        }
        assert_eq!(Procedure::from_subject("venue.nope"), None);
    }

    #[test]
    fn test_admin_procedures_require_ownership() {
        for procedure in [
            Procedure::UpdateVenue,
            Procedure::CreateCamera,
            Procedure::DeleteCamera,
            Procedure::SetCameraPortal,
            Procedure::SetSenderForCamera,
        ] {
            let guards = procedure.guards();
            assert!(guards.contains(&MODERATOR));
            assert!(guards.contains(&Guard::OwnerOfVenue));
        }
        assert!(Procedure::JoinVenue.guards().is_empty());
    }

    #[test]
    fn test_explicit_loads_require_moderator() {
        assert_eq!(Procedure::LoadVenue.guards(), &[MODERATOR]);
        assert_eq!(Procedure::LoadAndJoinVenue.guards(), &[MODERATOR]);
    }

    #[test]
    fn test_update_camera_input_distinguishes_null() {
        let cleared: UpdateCameraInput = input(json!({
            "cameraId": CameraId::new(),
            "senderId": null
        }))
        .unwrap();
        assert_eq!(cleared.sender_id, Some(None));

        let untouched: UpdateCameraInput = input(json!({
            "cameraId": CameraId::new(),
            "name": "stage"
        }))
        .unwrap();
        assert_eq!(untouched.sender_id, None);
        assert_eq!(untouched.name.as_deref(), Some("stage"));
    }

    #[test]
    fn test_bad_input_is_invalid_input() {
        let result: Result<VenueIdInput, _> = input(json!({"venueId": "not-a-uuid"}));
        assert!(matches!(result, Err(VenueError::InvalidInput(_))));
    }
}
