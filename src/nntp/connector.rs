//! Opening authenticated sessions

use super::connection::{AsyncStream, NntpConnection};
use crate::config::ServerConfig;
use crate::error::NntpError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore, pki_types::ServerName};

/// Produces ready-to-use sessions: connected, greeted and authenticated
///
/// The pool calls this once per slot at startup and again whenever a session
/// has to be re-established after a transport failure.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one session
    async fn connect(&self) -> Result<NntpConnection, NntpError>;
}

/// Connects to the configured server over TCP, optionally wrapped in TLS
pub struct ServerConnector {
    server: ServerConfig,
    tls: Option<TlsConnector>,
}

impl ServerConnector {
    /// Build a connector; TLS trust roots are loaded once here
    pub fn new(server: ServerConfig) -> Result<Self, NntpError> {
        let tls = if server.tls {
            Some(tls_connector()?)
        } else {
            None
        };
        Ok(Self { server, tls })
    }
}

fn tls_connector() -> Result<TlsConnector, NntpError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| NntpError::Tls(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

#[async_trait]
impl Connector for ServerConnector {
    async fn connect(&self) -> Result<NntpConnection, NntpError> {
        let timeout = self.server.command_timeout;
        let address = (self.server.host.as_str(), self.server.port);

        let tcp = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| NntpError::Timeout)??;
        tcp.set_nodelay(true)?;

        let stream: Box<dyn AsyncStream> = match &self.tls {
            Some(tls) => {
                let name = ServerName::try_from(self.server.host.clone())
                    .map_err(|e| NntpError::Tls(format!("invalid server name: {}", e)))?;
                let stream = tokio::time::timeout(timeout, tls.connect(name, tcp))
                    .await
                    .map_err(|_| NntpError::Timeout)?
                    .map_err(|e| NntpError::Tls(e.to_string()))?;
                Box::new(stream)
            }
            None => Box::new(tcp),
        };

        let mut conn = NntpConnection::handshake(stream, timeout).await?;

        if let Some(username) = self.server.username.as_deref() {
            let password = self.server.password.as_deref().unwrap_or_default();
            conn.authenticate(username, password).await?;
            tracing::debug!(host = %self.server.host, user = %username, "Authenticated");
        }

        Ok(conn)
    }
}
