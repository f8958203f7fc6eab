//! Venue domain: camera graph, admission policy, the aggregate and its
//! derived snapshots.

pub mod graph;
pub mod model;
pub mod policy;
pub mod projection;
pub mod reactive;

pub use graph::{Camera, CameraGraph, Portal};
pub use model::{Member, MemberKind, VenueModel};
pub use policy::{VenueInfo, VenueSettings, VenueUpdate, Visibility};
pub use projection::{AdminVenueState, CameraState, Projector, PublicVenueState, SubSpaceState};
