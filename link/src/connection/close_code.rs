use crate::transport::{CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_NORMAL};

/// Protocol error.
pub(crate) const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Policy violation.
pub(crate) const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Server-defined: token missing, invalid or expired.
pub(crate) const CLOSE_UNAUTHORIZED: u16 = 4001;
/// Server-defined: not allowed to access the project.
pub(crate) const CLOSE_FORBIDDEN: u16 = 4003;

/// Reason phrases that turn a 1002/1008 close into an authorization failure.
const FORBIDDEN_REASON_MARKERS: [&str; 5] = [
    "forbidden",
    "access denied",
    "not authorized",
    "not a member",
    "permission",
];

/// How the driver reacts to a socket close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseClass {
    /// Normal or going-away: stay down.
    Clean,
    /// Project access rejected: unbind and notify, never retry.
    Forbidden,
    /// Probably a stale token: refresh, then reconnect.
    RefreshAndRetry,
    /// Anything else: reconnect with backoff.
    Retry,
}

pub(crate) fn classify(code: u16, reason: &str) -> CloseClass {
    match code {
        CLOSE_NORMAL | CLOSE_GOING_AWAY => CloseClass::Clean,
        CLOSE_FORBIDDEN => CloseClass::Forbidden,
        CLOSE_PROTOCOL_ERROR | CLOSE_POLICY_VIOLATION if mentions_forbidden(reason) => {
            CloseClass::Forbidden
        },
        CLOSE_PROTOCOL_ERROR | CLOSE_POLICY_VIOLATION | CLOSE_ABNORMAL | CLOSE_UNAUTHORIZED => {
            CloseClass::RefreshAndRetry
        },
        _ => CloseClass::Retry,
    }
}

fn mentions_forbidden(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    FORBIDDEN_REASON_MARKERS.iter().any(|marker| reason.contains(marker))
}
