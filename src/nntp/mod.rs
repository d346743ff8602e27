//! NNTP client: wire commands, session setup and the session pool

mod connection;
mod connector;
mod pool;

pub use connection::{AsyncStream, NntpConnection};
pub use connector::{Connector, ServerConnector};
pub use pool::{PooledSession, Session, SessionPool};

use crate::error::NntpError;

/// Whether the session's transport is unusable after this error.
///
/// A rejected status (missing article, missing group, bad credentials) leaves
/// the session in a known state; I/O failures, timeouts and unparseable
/// replies do not.
pub fn is_transport(err: &NntpError) -> bool {
    matches!(
        err,
        NntpError::Io(_)
            | NntpError::Tls(_)
            | NntpError::Timeout
            | NntpError::ConnectionClosed
            | NntpError::InvalidResponse(_)
            | NntpError::Utf8(_)
            | NntpError::Other(_)
    )
}
