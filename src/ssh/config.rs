//! SSH Configuration

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConnectError;

/// SSH connection configuration
///
/// Immutable once a session has been established: the session keeps its own
/// shared copy and only hands out shared references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Remote host address
    pub host: String,

    /// SSH port (default: 22)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Authentication method
    pub auth: AuthMethod,

    /// Dial and handshake timeout. Written as (possibly fractional) seconds.
    #[serde(rename = "timeout_secs", default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,

    /// Host identity verification policy. Must be set before dialing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_key_policy: Option<HostKeyPolicy>,

    /// Called with the server's pre-authentication banner, if it sends one
    #[serde(skip)]
    pub banner_handler: Option<BannerHandler>,
}

/// How the remote host's identity key is checked during the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Reject unless the key matches a trusted entry in a known_hosts file.
    /// `None` selects `~/.ssh/known_hosts`.
    Strict {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        known_hosts: Option<PathBuf>,
    },

    /// Accept any host key.
    ///
    /// PLEASE AVOID THIS unless you control the network path: a
    /// man-in-the-middle proxy will be accepted silently.
    AcceptAny,
}

impl HostKeyPolicy {
    pub fn strict() -> Self {
        Self::Strict { known_hosts: None }
    }

    pub fn strict_with_file(path: impl Into<PathBuf>) -> Self {
        Self::Strict {
            known_hosts: Some(path.into()),
        }
    }

    /// Resolve the trust store location for strict mode
    pub fn known_hosts_path(&self) -> Option<PathBuf> {
        match self {
            HostKeyPolicy::Strict { known_hosts } => Some(
                known_hosts
                    .clone()
                    .unwrap_or_else(default_known_hosts_path),
            ),
            HostKeyPolicy::AcceptAny => None,
        }
    }
}

/// Default OpenSSH trust store location
pub fn default_known_hosts_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".ssh").join("known_hosts"))
        .unwrap_or_else(|| PathBuf::from("~/.ssh/known_hosts"))
}

/// Authentication methods supported
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    /// Password authentication
    Password { password: String },

    /// SSH key authentication
    Key {
        /// Path to private key file
        key_path: String,
        /// Optional passphrase for encrypted keys
        passphrase: Option<String>,
    },

    /// SSH agent authentication
    Agent,
}

impl AuthMethod {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password {
            password: password.into(),
        }
    }

    pub fn key(key_path: impl Into<String>, passphrase: Option<String>) -> Self {
        Self::Key {
            key_path: key_path.into(),
            passphrase,
        }
    }
}

/// Callback receiving the server banner text
#[derive(Clone)]
pub struct BannerHandler(Arc<dyn Fn(&str) + Send + Sync>);

impl BannerHandler {
    pub fn new(f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, banner: &str) {
        (self.0)(banner)
    }
}

impl fmt::Debug for BannerHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BannerHandler(..)")
    }
}

fn default_port() -> u16 {
    22
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}

impl SshConfig {
    /// Configuration with no host key policy selected yet.
    ///
    /// [`SshConfig::validate`] rejects it until a policy is chosen.
    pub fn new(username: impl Into<String>, host: impl Into<String>, auth: AuthMethod) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            username: username.into(),
            auth,
            timeout: default_timeout(),
            host_key_policy: None,
            banner_handler: None,
        }
    }

    /// Configuration checked against the user's `~/.ssh/known_hosts`
    pub fn with_known_hosts(
        username: impl Into<String>,
        host: impl Into<String>,
        auth: AuthMethod,
    ) -> Self {
        Self::new(username, host, auth).host_key_policy(HostKeyPolicy::strict())
    }

    /// Configuration that skips host key checking. See [`HostKeyPolicy::AcceptAny`].
    pub fn insecure(username: impl Into<String>, host: impl Into<String>, auth: AuthMethod) -> Self {
        Self::new(username, host, auth).host_key_policy(HostKeyPolicy::AcceptAny)
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = Some(policy);
        self
    }

    pub fn banner_handler(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.banner_handler = Some(BannerHandler::new(f));
        self
    }

    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, ConnectError> {
        serde_json::from_str(json).map_err(|e| ConnectError::Config(e.to_string()))
    }

    pub fn connect_timeout(&self) -> Duration {
        self.timeout
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Check the configuration before dialing
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.host.trim().is_empty() {
            return Err(ConnectError::Config("host is empty".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(ConnectError::Config("username is empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(ConnectError::Config(
                "connection timeout must be greater than zero".to_string(),
            ));
        }
        if self.host_key_policy.is_none() {
            return Err(ConnectError::Config(
                "no host key policy selected: choose strict known_hosts checking \
                 or opt in to accept_any explicitly"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
