//! Venue settings and the admission policy derived from them.

use chrono::{DateTime, Utc};
use common::types::{CameraId, Role, UserId};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Unlisted,
    Public,
}

impl Visibility {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Unlisted => "unlisted",
            Visibility::Public => "public",
        }
    }

    /// Parse the stored form. Unknown values fall back to `Private`.
    #[must_use]
    pub fn from_stored(value: &str) -> Self {
        match value {
            "public" => Visibility::Public,
            "unlisted" => Visibility::Unlisted,
            _ => Visibility::Private,
        }
    }
}

/// Persisted, owner-editable venue fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueSettings {
    pub name: String,
    pub visibility: Visibility,
    pub doors_auto_open: bool,
    pub doors_opening_time: Option<DateTime<Utc>>,
    pub doors_manually_opened: bool,
    pub stream_auto_start: bool,
    pub stream_start_time: Option<DateTime<Utc>>,
    pub stream_manually_started: bool,
    pub stream_manually_ended: bool,
    pub main_camera_id: Option<CameraId>,
}

impl VenueSettings {
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Doors follow the opening time when auto-open is set, otherwise the
    /// manual flag.
    #[must_use]
    pub fn doors_are_open(&self, now: DateTime<Utc>) -> bool {
        if self.doors_auto_open {
            return self.doors_opening_time.is_some_and(|t| t <= now);
        }
        self.doors_manually_opened
    }

    #[must_use]
    pub fn stream_is_active(&self, now: DateTime<Utc>) -> bool {
        let started = if self.stream_auto_start {
            self.stream_start_time.is_some_and(|t| t <= now)
        } else {
            self.stream_manually_started
        };
        started && !self.stream_manually_ended
    }

    fn opening_scheduled_after(&self, now: DateTime<Utc>) -> bool {
        self.doors_auto_open && self.doors_opening_time.is_some_and(|t| t > now)
    }
}

/// Everything admission needs to know about a venue.
///
/// Published by a loaded venue through a watch channel so that admission
/// checks never wait on the venue's mailbox.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VenueInfo {
    pub settings: VenueSettings,
    pub owners: Vec<UserId>,
}

impl VenueInfo {
    #[must_use]
    pub fn is_owner(&self, user_id: UserId) -> bool {
        self.owners.contains(&user_id)
    }

    /// Owners and admins are always admitted. Everyone else needs open doors,
    /// or a public/unlisted venue with no opening scheduled in the future.
    #[must_use]
    pub fn admits(&self, user_id: UserId, role: Role, now: DateTime<Utc>) -> bool {
        if self.is_owner(user_id) || role.at_least(Role::Admin) {
            return true;
        }
        if self.settings.doors_are_open(now) {
            return true;
        }
        match self.settings.visibility {
            Visibility::Private => false,
            Visibility::Public | Visibility::Unlisted => {
                !self.settings.opening_scheduled_after(now)
            }
        }
    }
}

/// Partial update of [`VenueSettings`]. Absent fields are left unchanged;
/// nullable fields distinguish "absent" from an explicit `null`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VenueUpdate {
    pub name: Option<String>,
    pub visibility: Option<Visibility>,
    pub doors_auto_open: Option<bool>,
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub doors_opening_time: Option<Option<DateTime<Utc>>>,
    pub doors_manually_opened: Option<bool>,
    pub stream_auto_start: Option<bool>,
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub stream_start_time: Option<Option<DateTime<Utc>>>,
    pub stream_manually_started: Option<bool>,
    pub stream_manually_ended: Option<bool>,
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub main_camera_id: Option<Option<CameraId>>,
}

impl VenueUpdate {
    pub fn apply_to(&self, settings: &mut VenueSettings) {
        if let Some(name) = &self.name {
            settings.name.clone_from(name);
        }
        if let Some(v) = self.visibility {
            settings.visibility = v;
        }
        if let Some(v) = self.doors_auto_open {
            settings.doors_auto_open = v;
        }
        if let Some(v) = self.doors_opening_time {
            settings.doors_opening_time = v;
        }
        if let Some(v) = self.doors_manually_opened {
            settings.doors_manually_opened = v;
        }
        if let Some(v) = self.stream_auto_start {
            settings.stream_auto_start = v;
        }
        if let Some(v) = self.stream_start_time {
            settings.stream_start_time = v;
        }
        if let Some(v) = self.stream_manually_started {
            settings.stream_manually_started = v;
        }
        if let Some(v) = self.stream_manually_ended {
            settings.stream_manually_ended = v;
        }
        if let Some(v) = self.main_camera_id {
            settings.main_camera_id = v;
        }
    }
}

/// Maps a present field to `Some(value)` (including `Some(None)` for `null`).
/// Combined with `#[serde(default)]`, an absent field stays `None`.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn info(visibility: Visibility) -> VenueInfo {
        VenueInfo {
            settings: VenueSettings {
                visibility,
                ..VenueSettings::named("hall")
            },
            owners: vec![UserId::new()],
        }
    }

    #[test]
    fn test_private_venue_rejects_non_owner_until_doors_open() {
        let now = Utc::now();
        let mut venue = info(Visibility::Private);
        let stranger = UserId::new();

        assert!(!venue.admits(stranger, Role::Moderator, now));

        venue.settings.doors_manually_opened = true;
        assert!(venue.admits(stranger, Role::User, now));
    }

    #[test]
    fn test_owner_and_admin_always_admitted() {
        let now = Utc::now();
        let venue = info(Visibility::Private);
        let owner = venue.owners[0];

        assert!(venue.admits(owner, Role::Guest, now));
        assert!(venue.admits(UserId::new(), Role::Admin, now));
        assert!(venue.admits(UserId::new(), Role::Superadmin, now));
    }

    #[test]
    fn test_public_venue_waits_for_scheduled_opening() {
        let now = Utc::now();
        let mut venue = info(Visibility::Public);
        let stranger = UserId::new();
        assert!(venue.admits(stranger, Role::Guest, now));

        venue.settings.doors_auto_open = true;
        venue.settings.doors_opening_time = Some(now + Duration::hours(1));
        assert!(!venue.admits(stranger, Role::Guest, now));

        venue.settings.doors_opening_time = Some(now - Duration::minutes(1));
        assert!(venue.admits(stranger, Role::Guest, now));
    }

    #[test]
    fn test_auto_open_ignores_manual_flag() {
        let now = Utc::now();
        let settings = VenueSettings {
            doors_auto_open: true,
            doors_opening_time: None,
            doors_manually_opened: true,
            ..VenueSettings::default()
        };
        assert!(!settings.doors_are_open(now));
    }

    #[test]
    fn test_stream_activity() {
        let now = Utc::now();
        let mut settings = VenueSettings::default();
        assert!(!settings.stream_is_active(now));

        settings.stream_manually_started = true;
        assert!(settings.stream_is_active(now));

        settings.stream_manually_ended = true;
        assert!(!settings.stream_is_active(now));

        let settings = VenueSettings {
            stream_auto_start: true,
            stream_start_time: Some(now - Duration::seconds(5)),
            ..VenueSettings::default()
        };
        assert!(settings.stream_is_active(now));
    }

    #[test]
    fn test_update_distinguishes_null_from_absent() {
        let mut settings = VenueSettings {
            main_camera_id: Some(CameraId::new()),
            ..VenueSettings::named("hall")
        };

        let absent: VenueUpdate = serde_json::from_str(r#"{"name":"arena"}"#).unwrap();
        absent.apply_to(&mut settings);
        assert_eq!(settings.name, "arena");
        assert!(settings.main_camera_id.is_some());

        let cleared: VenueUpdate = serde_json::from_str(r#"{"mainCameraId":null}"#).unwrap();
        cleared.apply_to(&mut settings);
        assert!(settings.main_camera_id.is_none());
    }

    #[test]
    fn test_update_doors_manually_opened() {
        let mut settings = VenueSettings::default();
        let update: VenueUpdate =
            serde_json::from_str(r#"{"doorsManuallyOpened":true,"visibility":"unlisted"}"#).unwrap();
        update.apply_to(&mut settings);
        assert!(settings.doors_manually_opened);
        assert_eq!(settings.visibility, Visibility::Unlisted);
    }
}
