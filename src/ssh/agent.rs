//! Public key authentication through a running ssh-agent

use std::future::Future;

use russh::client::Handle;
use russh::keys::agent::client::{AgentClient, AgentStream};
use russh::keys::ssh_key::{HashAlg, PublicKey};
use russh::{AgentAuthError, CryptoVec, Signer};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::ConnectError;

type AgentConnection = AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>;

#[cfg(windows)]
const AGENT_PIPE: &str = r"\\.\pipe\openssh-ssh-agent";

/// Lends the agent to russh for one signature.
///
/// `auth_publickey_sign` must return a `Send` future, so the borrowed key is
/// copied into the future instead of being captured by reference.
struct LentAgent<'a>(&'a mut AgentConnection);

impl Signer for LentAgent<'_> {
    type Error = AgentAuthError;

    fn auth_publickey_sign(
        &mut self,
        key: &PublicKey,
        hash_alg: Option<HashAlg>,
        to_sign: CryptoVec,
    ) -> impl Future<Output = Result<CryptoVec, Self::Error>> + Send {
        let key = key.clone();
        let agent = &mut *self.0;
        async move { Ok(agent.sign_request(&key, hash_alg, to_sign).await?) }
    }
}

#[cfg(unix)]
async fn dial_agent() -> Result<AgentConnection, ConnectError> {
    let agent = AgentClient::connect_env()
        .await
        .map_err(|e| ConnectError::Agent(format!("cannot reach agent via SSH_AUTH_SOCK: {}", e)))?;
    Ok(agent.dynamic())
}

#[cfg(windows)]
async fn dial_agent() -> Result<AgentConnection, ConnectError> {
    let agent = AgentClient::connect_named_pipe(AGENT_PIPE)
        .await
        .map_err(|e| ConnectError::Agent(format!("cannot reach agent at {}: {}", AGENT_PIPE, e)))?;
    Ok(agent.dynamic())
}

#[cfg(not(any(unix, windows)))]
async fn dial_agent() -> Result<AgentConnection, ConnectError> {
    Err(ConnectError::Agent(
        "no ssh-agent transport on this platform".to_string(),
    ))
}

/// Why agent authentication gave up after trying `tried` identities
fn refusal(tried: usize, last_sign_error: Option<&str>) -> ConnectError {
    let mut msg = format!("server refused all {} agent identities", tried);
    if let Some(err) = last_sign_error {
        msg.push_str("; last signing error: ");
        msg.push_str(err);
    }
    ConnectError::Authentication(msg)
}

/// Session with the local ssh-agent
pub struct SshAgentClient {
    agent: AgentConnection,
}

impl SshAgentClient {
    /// Open the agent socket (`SSH_AUTH_SOCK`, or the OpenSSH pipe on Windows)
    pub async fn connect() -> Result<Self, ConnectError> {
        let agent = dial_agent().await?;
        debug!("Connected to ssh-agent");
        Ok(Self { agent })
    }

    /// Offer each identity held by the agent until the server takes one.
    ///
    /// An empty or unreadable agent is [`ConnectError::Agent`]. Every identity
    /// refused is [`ConnectError::Authentication`].
    pub async fn authenticate(
        &mut self,
        handle: &mut Handle<ClientHandler>,
        username: &str,
    ) -> Result<(), ConnectError> {
        let identities = self
            .agent
            .request_identities()
            .await
            .map_err(|e| ConnectError::Agent(format!("agent did not list identities: {}", e)))?;
        if identities.is_empty() {
            return Err(ConnectError::Agent("agent holds no identities".to_string()));
        }

        let mut last_sign_error = None;
        for identity in &identities {
            debug!(
                "Offering agent identity {} ({})",
                identity.comment(),
                identity.algorithm()
            );
            let outcome = handle
                .authenticate_publickey_with(
                    username,
                    identity.clone(),
                    None,
                    &mut LentAgent(&mut self.agent),
                )
                .await;

            match outcome {
                Ok(result) if result.success() => {
                    info!("Authenticated {} with agent identity {}", username, identity.comment());
                    return Ok(());
                }
                Ok(_) => debug!("Identity {} refused", identity.comment()),
                Err(e) => {
                    warn!("Agent could not sign with {}: {}", identity.comment(), e);
                    last_sign_error = Some(e.to_string());
                }
            }
        }

        Err(refusal(identities.len(), last_sign_error.as_deref()))
    }
}

/// Cheap check that an agent is configured. Connecting may still fail.
pub fn is_agent_available() -> bool {
    if cfg!(windows) {
        true
    } else if cfg!(unix) {
        std::env::var_os("SSH_AUTH_SOCK").is_some_and(|sock| !sock.is_empty())
    } else {
        false
    }
}
