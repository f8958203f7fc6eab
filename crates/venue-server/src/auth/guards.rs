//! Guard chain evaluated before a procedure runs.
//!
//! Guards are read-only checks over the calling session and the venue it is
//! in. They run in declared order; the first failure aborts with
//! `VenueError::Authorization` and the procedure never executes.
//! Composition is conjunctive only.

use crate::actors::VenueHandle;
use crate::errors::VenueError;
use crate::observability::metrics;
use crate::venue::model::MemberKind;
use common::types::{ConnectionId, Role, UserId};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    RoleAtLeast(Role),
    /// Owner of the current venue. Admins and above always pass.
    OwnerOfVenue,
    MemberOfVenue,
    ReceiverSession,
    PublisherSession,
    /// Receiver currently joined to a camera.
    InCamera,
}

impl Guard {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Guard::RoleAtLeast(_) => "role_at_least",
            Guard::OwnerOfVenue => "owner_of_venue",
            Guard::MemberOfVenue => "member_of_venue",
            Guard::ReceiverSession => "receiver_session",
            Guard::PublisherSession => "publisher_session",
            Guard::InCamera => "in_camera",
        }
    }
}

/// The calling session, as seen by guards.
pub struct GuardContext<'a> {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub role: Role,
    pub kind: &'a MemberKind,
    pub venue: Option<&'a VenueHandle>,
}

/// Evaluate `guards` in order.
///
/// # Errors
///
/// Returns `VenueError::Authorization` for the first guard that fails.
pub async fn check_guards(guards: &[Guard], ctx: &GuardContext<'_>) -> Result<(), VenueError> {
    for guard in guards {
        if let Err(message) = evaluate(*guard, ctx).await {
            metrics::record_guard_rejection(guard.as_str());
            debug!(
                target: "venue.auth",
                connection_id = %ctx.connection_id,
                guard = guard.as_str(),
                role = ctx.role.as_str(),
                "Guard rejected request"
            );
            return Err(VenueError::Authorization(message));
        }
    }
    Ok(())
}

async fn evaluate(guard: Guard, ctx: &GuardContext<'_>) -> Result<(), String> {
    match guard {
        Guard::RoleAtLeast(level) => {
            if ctx.role.at_least(level) {
                Ok(())
            } else {
                Err(format!("Requires the {level} role or above"))
            }
        }
        Guard::MemberOfVenue => current_venue(ctx).map(|_| ()),
        Guard::OwnerOfVenue => {
            let venue = current_venue(ctx)?;
            if ctx.role.at_least(Role::Admin) || venue.info().is_owner(ctx.user_id) {
                Ok(())
            } else {
                Err("Only venue owners may do this".to_string())
            }
        }
        Guard::ReceiverSession => match ctx.kind {
            MemberKind::Receiver => Ok(()),
            MemberKind::Publisher { .. } => Err("Not allowed for sender sessions".to_string()),
        },
        Guard::PublisherSession => match ctx.kind {
            MemberKind::Publisher { .. } => Ok(()),
            MemberKind::Receiver => Err("Only sender sessions may do this".to_string()),
        },
        Guard::InCamera => {
            let venue = current_venue(ctx)?;
            match venue.placement(ctx.connection_id).await {
                Ok(placement) if placement.camera_id.is_some() => Ok(()),
                _ => Err("Not in a camera".to_string()),
            }
        }
    }
}

fn current_venue<'a>(ctx: &GuardContext<'a>) -> Result<&'a VenueHandle, String> {
    ctx.venue
        .filter(|venue| !venue.is_closed())
        .ok_or_else(|| "Not in a venue".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::SenderId;

    fn ctx(role: Role, kind: &MemberKind) -> GuardContext<'_> {
        GuardContext {
            connection_id: ConnectionId::new(),
            user_id: UserId::new(),
            role,
            kind,
            venue: None,
        }
    }

    #[tokio::test]
    async fn test_role_guard() {
        let kind = MemberKind::Receiver;
        let moderator = [Guard::RoleAtLeast(Role::Moderator)];

        assert!(check_guards(&moderator, &ctx(Role::Moderator, &kind)).await.is_ok());
        assert!(check_guards(&moderator, &ctx(Role::Superadmin, &kind)).await.is_ok());
        assert!(matches!(
            check_guards(&moderator, &ctx(Role::User, &kind)).await,
            Err(VenueError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn test_session_kind_guards() {
        let receiver = MemberKind::Receiver;
        let publisher = MemberKind::Publisher {
            sender_id: SenderId::from("cam-a"),
        };

        assert!(check_guards(&[Guard::ReceiverSession], &ctx(Role::User, &receiver))
            .await
            .is_ok());
        assert!(check_guards(&[Guard::ReceiverSession], &ctx(Role::User, &publisher))
            .await
            .is_err());
        assert!(check_guards(&[Guard::PublisherSession], &ctx(Role::User, &publisher))
            .await
            .is_ok());
        assert!(check_guards(&[Guard::PublisherSession], &ctx(Role::User, &receiver))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_venue_guards_fail_outside_a_venue() {
        let kind = MemberKind::Receiver;
        for guard in [Guard::MemberOfVenue, Guard::OwnerOfVenue, Guard::InCamera] {
            let result = check_guards(&[guard], &ctx(Role::Superadmin, &kind)).await;
            assert!(matches!(result, Err(VenueError::Authorization(m)) if m == "Not in a venue"));
        }
    }

    #[tokio::test]
    async fn test_first_failing_guard_wins() {
        let kind = MemberKind::Receiver;
        let result = check_guards(
            &[
                Guard::RoleAtLeast(Role::Admin),
                Guard::MemberOfVenue,
            ],
            &ctx(Role::User, &kind),
        )
        .await;
        assert!(matches!(result, Err(VenueError::Authorization(m)) if m.contains("admin")));
    }
}
