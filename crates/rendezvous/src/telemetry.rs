//! Counter names.
//!
//! Recorded through the `metrics` facade; they cost nothing until the
//! application installs a recorder.

/// Inbound connections handed to their `dial`.
pub const CONNECTIONS_DELIVERED: &str = "dialback_connections_delivered_total";
/// Inbound connections with a valid token but no waiter.
pub const CONNECTIONS_UNMATCHED: &str = "dialback_connections_unmatched_total";
/// Inbound connections closed for a bad or missing token.
pub const HANDSHAKES_REJECTED: &str = "dialback_handshakes_rejected_total";
/// `dial` calls that ran out of time.
pub const DIALS_TIMED_OUT: &str = "dialback_dials_timed_out_total";

pub(crate) fn incr(name: &'static str) {
    ::metrics::counter!(name).increment(1);
}
