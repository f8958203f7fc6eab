//! Observability for the venue server.
//!
//! All actor loops and handlers use `#[instrument(skip_all)]` with an explicit
//! allow-list of safe fields. Metric labels are bounded (see [`metrics`]).
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `venue_connections_active` | Gauge | none |
//! | `venue_venues_loaded` | Gauge | none |
//! | `venue_actor_mailbox_depth` | Gauge | `actor_type` |
//! | `venue_request_latency_seconds` | Histogram | `procedure`, `status` |
//! | `venue_store_latency_seconds` | Histogram | `operation` |
//! | `venue_media_latency_seconds` | Histogram | `operation` |
//! | `venue_guard_rejections_total` | Counter | `guard` |
//! | `venue_pushes_dropped_total` | Counter | `slot` |
//! | `venue_protocol_violations_total` | Counter | `reason` |
//! | `venue_errors_total` | Counter | `kind` |
//! | `venue_actor_panics_total` | Counter | `actor_type` |
//! | `venue_unloads_total` | Counter | none |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
