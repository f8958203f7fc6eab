//! # Venue Test Utilities
//!
//! Shared test utilities for the Venue Server.
//!
//! - `fixtures` - Test users and identity tokens
//! - `harness` - In-process server (in-memory store, mock media) and
//!   channel-backed clients that speak the wire protocol
//!
//! ## Usage
//!
//! ```rust,ignore
//! use venue_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = TestVenueServer::new();
//!     let owner = TestUser::moderator("ada");
//!     let venue_id = server.create_venue("hall", &owner).await;
//!
//!     let mut client = server.connect(&owner);
//!     client.call("venue.join", json!({ "venueId": venue_id })).await;
//! }
//! ```

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::*;
