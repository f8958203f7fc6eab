//! Venue Server Library
//!
//! Session and state engine for multi-party virtual venues:
//!
//! - Websocket session protocol with request/response and subscription pushes
//! - Identity tokens and a declarative guard chain per procedure
//! - Camera/portal graph with directed portals and stale-edge cleanup
//! - Venue lifecycle (`Unloaded → Loading → Loaded → Unloading`) with
//!   single-flight loading and exactly-once unloading
//! - Reactive projection of venue state into per-audience snapshots
//! - Media negotiation through a pluggable media-transport collaborator
//!
//! # Architecture
//!
//! ```text
//! VenueControllerActor (singleton)
//! ├── owns the venue lifecycle table
//! └── supervises N VenueActors
//!     └── VenueActor (one per loaded venue)
//!         ├── owns graph, policy, members and the media router
//!         └── pushes snapshots to ConnectionActors
//!             └── ConnectionActor (one per websocket connection)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Controller, venue and connection actors
//! - [`auth`] - Identity tokens and guards
//! - [`session`] - Per-connection session and request dispatcher
//! - [`server`] - `/ws` endpoint
//! - [`venue`] - Graph, policy, reactive projection
//! - [`store`] - Persistence seam (Postgres, in-memory)
//! - [`media`] - Media-transport seam (HTTP, mock)
//! - [`ops`] - Operator console

#![warn(clippy::pedantic)]

pub mod actors;
pub mod auth;
pub mod config;
pub mod errors;
pub mod media;
pub mod observability;
pub mod ops;
pub mod protocol;
pub mod server;
pub mod session;
pub mod store;
pub mod venue;
