//! Observability for the Room Controller.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit field
//! allow-listing: room ids, session ids and feature categories may appear,
//! access tokens and key material never do.
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `rc_auth_callout_total` | Counter | `result`, `reason` | Authorization decisions |
//! | `rc_auth_callout_duration_seconds` | Histogram | `result` | Callout latency |
//! | `rc_consumer_provisioning_total` | Counter | `category`, `status` | Per-category consumer get-or-create |
//! | `rc_side_effect_failures_total` | Counter | `effect` | Fail-open bookkeeping failures |
//! | `rc_db_query_duration_seconds` | Histogram | `operation`, `status` | Relational query latency |

pub mod metrics;
