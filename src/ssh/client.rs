//! SSH Client implementation using russh

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use russh::client;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use tracing::{debug, info};

use super::agent::SshAgentClient;
use super::config::{AuthMethod, BannerHandler, SshConfig};
use super::error::ConnectError;
use super::handle_owner::spawn_handle_owner_task;
use super::known_hosts::HostKeyVerifier;
use super::session::Session;
use super::transport::RusshTransport;

/// Dials, verifies and authenticates one connection
pub struct SshClient {
    config: SshConfig,
}

impl SshClient {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Connect to the SSH server and return a session
    pub async fn connect(self) -> Result<Session, ConnectError> {
        self.config.validate()?;

        let policy = self
            .config
            .host_key_policy
            .as_ref()
            .ok_or_else(|| ConnectError::Config("no host key policy selected".to_string()))?;
        let verifier = Arc::new(HostKeyVerifier::from_policy(policy)?);

        let addr = self.config.address();
        info!("Connecting to SSH server at {}", addr);

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(
            self.config.host.clone(),
            self.config.port,
            verifier,
            self.config.banner_handler.clone(),
        );
        let rejection = handler.rejection();

        let timeout = self.config.connect_timeout();
        let mut handle = tokio::time::timeout(
            timeout,
            client::connect(
                Arc::new(ssh_config),
                (self.config.host.as_str(), self.config.port),
                handler,
            ),
        )
        .await
        .map_err(|_| ConnectError::Timeout {
            addr: addr.clone(),
            timeout,
        })?
        .map_err(|e| take_rejection(&rejection).unwrap_or(e))?;

        debug!("SSH handshake completed with {}", addr);

        let username = self.config.username.clone();
        let authenticated = match &self.config.auth {
            AuthMethod::Password { password } => handle
                .authenticate_password(&username, password)
                .await
                .map_err(|e| take_rejection(&rejection).unwrap_or_else(|| e.into()))?
                .success(),
            AuthMethod::Key {
                key_path,
                passphrase,
            } => {
                let key = russh::keys::load_secret_key(key_path, passphrase.as_deref())
                    .map_err(|e| ConnectError::Key(format!("{}: {}", key_path, e)))?;
                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&username, key_with_hash)
                    .await
                    .map_err(|e| take_rejection(&rejection).unwrap_or_else(|| e.into()))?
                    .success()
            }
            AuthMethod::Agent => {
                let mut agent = SshAgentClient::connect().await?;
                agent.authenticate(&mut handle, &username).await?;
                true
            }
        };

        if !authenticated {
            return Err(ConnectError::Authentication(format!(
                "server rejected credentials for {}@{}",
                username, addr
            )));
        }

        info!("SSH authentication successful for {}@{}", username, addr);

        let session_id = uuid::Uuid::new_v4().to_string();
        let controller = spawn_handle_owner_task(handle, session_id.clone());
        Ok(Session::from_transport(
            session_id,
            self.config,
            Arc::new(RusshTransport::new(controller)),
        ))
    }
}

/// The handler's recorded host key rejection, if any.
///
/// russh may surface a rejected key as a generic protocol error, so the
/// handler keeps the precise reason here.
fn take_rejection(slot: &Mutex<Option<ConnectError>>) -> Option<ConnectError> {
    slot.lock().take()
}

/// Client handler for russh callbacks
pub struct ClientHandler {
    host: String,
    port: u16,
    verifier: Arc<HostKeyVerifier>,
    banner: Option<BannerHandler>,
    rejection: Arc<Mutex<Option<ConnectError>>>,
}

impl ClientHandler {
    pub fn new(
        host: String,
        port: u16,
        verifier: Arc<HostKeyVerifier>,
        banner: Option<BannerHandler>,
    ) -> Self {
        Self {
            host,
            port,
            verifier,
            banner,
            rejection: Arc::new(Mutex::new(None)),
        }
    }

    fn rejection(&self) -> Arc<Mutex<Option<ConnectError>>> {
        self.rejection.clone()
    }
}

impl client::Handler for ClientHandler {
    type Error = ConnectError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.verifier.check(&self.host, self.port, server_public_key) {
            Ok(()) => Ok(true),
            Err(e) => {
                let summary = e.to_string();
                *self.rejection.lock() = Some(e);
                Err(ConnectError::Protocol(summary))
            }
        }
    }

    async fn auth_banner(
        &mut self,
        banner: &str,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        debug!("Server banner from {}: {} bytes", self.host, banner.len());
        if let Some(handler) = &self.banner {
            handler.call(banner);
        }
        Ok(())
    }
}
