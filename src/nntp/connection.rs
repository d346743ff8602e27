//! A single NNTP session over any async byte stream.
//!
//! Commands are built and status lines parsed with `nntp_rs::commands`; this
//! layer adds the framing around them: per-read timeouts and a body reader
//! that keeps line terminators, so the yEnc control lines survive intact.

use crate::error::NntpError;
use nntp_rs::{NntpResponse, codes, commands};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Byte stream an NNTP session can run over (TCP, TLS, or an in-memory pipe)
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// One connected NNTP session
///
/// Every read is bounded by the command timeout, so a stalled server turns
/// into [`NntpError::Timeout`] instead of a hung fetch.
pub struct NntpConnection {
    stream: BufReader<Box<dyn AsyncStream>>,
    timeout: Duration,
    line: Vec<u8>,
}

impl std::fmt::Debug for NntpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NntpConnection")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn rejected(response: NntpResponse) -> NntpError {
    NntpError::Protocol {
        code: response.code,
        message: response.message,
    }
}

impl NntpConnection {
    /// Wrap an already-greeted stream
    pub fn new(stream: Box<dyn AsyncStream>, timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            timeout,
            line: Vec::with_capacity(256),
        }
    }

    /// Wrap a fresh stream and consume the server greeting (200 or 201)
    pub async fn handshake(
        stream: Box<dyn AsyncStream>,
        timeout: Duration,
    ) -> Result<Self, NntpError> {
        let mut conn = Self::new(stream, timeout);
        let greeting = conn.read_response().await?;
        if !matches!(
            greeting.code,
            codes::READY_POSTING_ALLOWED | codes::READY_NO_POSTING
        ) {
            return Err(rejected(greeting));
        }
        tracing::debug!(code = greeting.code, message = %greeting.message, "NNTP greeting");
        Ok(conn)
    }

    /// `AUTHINFO USER` then `AUTHINFO PASS`; a server that accepts the user
    /// alone (281 straight away) skips the password
    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), NntpError> {
        self.send(&commands::authinfo_user(username)).await?;
        let response = self.read_response().await?;
        let response = match response.code {
            codes::AUTH_CONTINUE => {
                self.send(&commands::authinfo_pass(password)).await?;
                self.read_response().await?
            }
            _ => response,
        };
        if response.code != codes::AUTH_ACCEPTED {
            return Err(NntpError::AuthFailed(format!(
                "{} {}",
                response.code, response.message
            )));
        }
        Ok(())
    }

    /// `GROUP <name>` (expects 211)
    pub async fn group(&mut self, name: &str) -> Result<nntp_rs::GroupInfo, NntpError> {
        self.send(&commands::group(name)).await?;
        let response = self.read_response().await?;
        if response.code == codes::NO_SUCH_GROUP {
            return Err(NntpError::NoSuchGroup(name.to_string()));
        }
        commands::parse_group_response(response)
    }

    /// `BODY <id>` (expects 22x), streaming the dot-unstuffed body into `out`
    ///
    /// Returns the number of body bytes written. Line endings are passed through unchanged.
    pub async fn body<W>(&mut self, message_id: &str, out: &mut W) -> Result<u64, NntpError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let id = message_id.trim_start_matches('<').trim_end_matches('>');
        self.send(&commands::body(&format!("<{}>", id))).await?;
        let response = self.read_response().await?;
        if matches!(
            response.code,
            codes::NO_SUCH_ARTICLE_ID | codes::NO_SUCH_ARTICLE_NUMBER
        ) {
            return Err(NntpError::NoSuchArticle(id.to_string()));
        }
        if !(220..230).contains(&response.code) {
            return Err(rejected(response));
        }

        let mut written = 0u64;
        loop {
            self.read_line().await?;
            let line = self.line.as_slice();
            if line == b".\r\n" || line == b".\n" || line == b"." {
                break;
            }
            let line = if line.starts_with(b"..") { &line[1..] } else { line };
            out.write_all(line).await?;
            written += line.len() as u64;
        }
        out.flush().await?;
        Ok(written)
    }

    /// `QUIT`; the reply is best-effort
    pub async fn quit(&mut self) -> Result<(), NntpError> {
        self.send(commands::quit()).await?;
        let _ = self.read_response().await;
        Ok(())
    }

    async fn send(&mut self, command: &str) -> Result<(), NntpError> {
        tracing::trace!(command = command.trim_end(), "Sending");
        let stream = self.stream.get_mut();
        stream.write_all(command.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_response(&mut self) -> Result<NntpResponse, NntpError> {
        self.read_line().await?;
        let text = String::from_utf8_lossy(&self.line);
        commands::parse_single_response(text.trim_end())
    }

    /// Read one line, terminator included, into `self.line`
    async fn read_line(&mut self) -> Result<(), NntpError> {
        self.line.clear();
        let read = tokio::time::timeout(self.timeout, self.stream.read_until(b'\n', &mut self.line))
            .await
            .map_err(|_| NntpError::Timeout)??;
        if read == 0 {
            return Err(NntpError::ConnectionClosed);
        }
        Ok(())
    }
}
