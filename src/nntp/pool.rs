//! Fixed-size pool of authenticated sessions
//!
//! A session is checked out by exactly one fetch at a time and returned when
//! its [`PooledSession`] guard drops. Each session remembers the group it last
//! selected so consecutive fetches from the same group skip `GROUP`.

use super::connection::NntpConnection;
use super::connector::Connector;
use super::is_transport;
use crate::error::{Error, NntpError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWrite;
use tokio::sync::{Semaphore, SemaphorePermit};

/// One pooled session and its selected-group cache
#[derive(Debug, Default)]
pub struct Session {
    id: usize,
    conn: Option<NntpConnection>,
    group: Option<String>,
}

impl Session {
    /// Slot number within the pool
    pub fn id(&self) -> usize {
        self.id
    }

    /// Group currently selected on the server side, if known
    pub fn current_group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Whether the transport is believed usable
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn invalidate(&mut self) {
        self.conn = None;
        self.group = None;
    }

    /// Live connection, reconnecting first if the last one was invalidated
    async fn connection(
        &mut self,
        connector: &dyn Connector,
    ) -> std::result::Result<&mut NntpConnection, NntpError> {
        if self.conn.is_none() {
            tracing::debug!(session = self.id, "Reconnecting session");
            self.conn = Some(connector.connect().await?);
            self.group = None;
        }
        self.conn.as_mut().ok_or(NntpError::ConnectionClosed)
    }
}

/// Pool of sessions bounded by a semaphore
pub struct SessionPool {
    connector: Arc<dyn Connector>,
    idle: Mutex<Vec<Session>>,
    permits: Semaphore,
    size: usize,
    checked_out: AtomicUsize,
    peak: AtomicUsize,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("size", &self.size)
            .field("checked_out", &self.checked_out())
            .finish_non_exhaustive()
    }
}

impl SessionPool {
    /// Open up to `size` sessions concurrently
    ///
    /// Sessions that fail to connect or authenticate are logged and left out;
    /// the pool runs with whatever succeeded. If none succeeded, returns
    /// [`Error::NoSessions`].
    pub async fn acquire(size: usize, connector: Arc<dyn Connector>) -> Result<Self> {
        let results = futures::future::join_all((0..size).map(|_| connector.connect())).await;

        let mut sessions = Vec::with_capacity(size);
        let mut last_error = None;
        for (slot, result) in results.into_iter().enumerate() {
            match result {
                Ok(conn) => sessions.push(Session {
                    id: slot,
                    conn: Some(conn),
                    group: None,
                }),
                Err(e) => {
                    tracing::warn!(session = slot, error = %e, "Session failed to connect");
                    last_error = Some(e.to_string());
                }
            }
        }

        if sessions.is_empty() {
            return Err(Error::NoSessions {
                attempted: size,
                last_error: last_error.unwrap_or_else(|| "pool size is zero".to_string()),
            });
        }
        if sessions.len() < size {
            tracing::warn!(
                connected = sessions.len(),
                requested = size,
                "Running with a reduced session pool"
            );
        } else {
            tracing::info!(sessions = size, "Session pool ready");
        }

        Ok(Self::from_sessions(sessions, connector))
    }

    fn from_sessions(sessions: Vec<Session>, connector: Arc<dyn Connector>) -> Self {
        let size = sessions.len();
        Self {
            connector,
            idle: Mutex::new(sessions),
            permits: Semaphore::new(size),
            size,
            checked_out: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Number of sessions in the pool
    pub fn size(&self) -> usize {
        self.size
    }

    /// Sessions currently checked out
    pub fn checked_out(&self) -> usize {
        self.checked_out.load(Ordering::SeqCst)
    }

    /// Highest number of sessions ever checked out at once
    pub fn peak_checked_out(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Wait for an idle session and take exclusive use of it
    pub async fn checkout(&self) -> std::result::Result<PooledSession<'_>, NntpError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| NntpError::ConnectionClosed)?;

        let session = self
            .idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .ok_or(NntpError::ConnectionClosed)?;

        let now = self.checked_out.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        Ok(PooledSession {
            pool: self,
            session,
            in_flight: false,
            _permit: permit,
        })
    }

    /// Stop handing out sessions and send `QUIT` on every idle one
    pub async fn close(&self) {
        self.permits.close();
        let sessions = std::mem::take(&mut *self.idle.lock().unwrap_or_else(|e| e.into_inner()));
        for mut session in sessions {
            if let Some(conn) = session.conn.as_mut()
                && let Err(e) = conn.quit().await
            {
                tracing::debug!(session = session.id, error = %e, "QUIT failed");
            }
        }
    }
}

/// Exclusive use of one session; returns it to the pool on drop
pub struct PooledSession<'a> {
    pool: &'a SessionPool,
    session: Session,
    /// Set while a command awaits its response; a guard dropped in that
    /// state leaves unread bytes on the wire
    in_flight: bool,
    _permit: SemaphorePermit<'a>,
}

impl PooledSession<'_> {
    /// The underlying session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Select `group` unless it is already the session's current group
    ///
    /// Returns whether a `GROUP` command was sent. A transport failure
    /// invalidates the session; a rejection leaves the cache untouched.
    pub async fn ensure_group(&mut self, group: &str) -> std::result::Result<bool, NntpError> {
        if self.session.current_group() == Some(group) {
            return Ok(false);
        }
        let conn = self.session.connection(self.pool.connector.as_ref()).await?;
        self.in_flight = true;
        let selected = conn.group(group).await;
        self.in_flight = false;
        match selected {
            Ok(_) => {
                self.session.group = Some(group.to_string());
                Ok(true)
            }
            Err(e) => {
                if is_transport(&e) {
                    self.session.invalidate();
                }
                Err(e)
            }
        }
    }

    /// Fetch an article body into `out`
    pub async fn fetch_body<W>(
        &mut self,
        message_id: &str,
        out: &mut W,
    ) -> std::result::Result<u64, NntpError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let conn = self.session.connection(self.pool.connector.as_ref()).await?;
        self.in_flight = true;
        let fetched = conn.body(message_id, out).await;
        self.in_flight = false;
        match fetched {
            Ok(written) => Ok(written),
            Err(e) => {
                if is_transport(&e) {
                    tracing::debug!(session = self.session.id, error = %e, "Invalidating session");
                    self.session.invalidate();
                }
                Err(e)
            }
        }
    }
}

impl Drop for PooledSession<'_> {
    fn drop(&mut self) {
        if self.in_flight {
            tracing::debug!(session = self.session.id, "Dropped mid-command, invalidating session");
            self.session.invalidate();
        }
        let session = std::mem::take(&mut self.session);
        self.pool
            .idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(session);
        self.pool.checked_out.fetch_sub(1, Ordering::SeqCst);
    }
}
