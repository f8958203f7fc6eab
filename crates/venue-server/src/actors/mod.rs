//! Actor hierarchy for the venue server.
//!
//! ```text
//! VenueControllerActor (singleton per server)
//! └── supervises N VenueActors
//!     └── VenueActor (one per loaded venue)
//!         ├── owns the venue model and its projections
//!         └── pushes to N ConnectionActors
//!             └── ConnectionActor (one per client connection)
//! ```
//!
//! - **One writer per venue**: every mutation of a venue runs inside its actor
//! - **CancellationToken propagation**: the controller passes child tokens to venues
//! - **Mailbox monitoring**: depth thresholds with metrics (Venue: 100/500, Connection: 50/200)
//!
//! # Modules
//!
//! - [`controller`] - `VenueControllerActor`, loads and supervises venues
//! - [`venue`] - `VenueActor` per loaded venue
//! - [`connection`] - `ConnectionActor` per client connection
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor counters

pub mod connection;
pub mod controller;
pub mod messages;
pub mod metrics;
pub mod venue;

pub use connection::{ConnectionActor, ConnectionHandle};
pub use controller::{VenueControllerActor, VenueControllerHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use venue::{VenueActor, VenueHandle};
