//! SSH module - connections, sessions and remote commands
//!
//! Built on the russh library.
//!
//! # Features
//! - Password, key file and SSH agent authentication
//! - Host key verification via known_hosts, or an explicit insecure opt-in
//! - Independent sub-channels multiplexed over one connection
//! - Cancellable remote command execution

mod agent;
mod client;
mod config;
mod error;
mod exec;
mod handle_owner;
pub mod known_hosts;
pub(crate) mod session;
pub mod transport;

pub use agent::{is_agent_available, SshAgentClient};
pub use client::{ClientHandler, SshClient};
pub use config::{default_known_hosts_path, AuthMethod, BannerHandler, HostKeyPolicy, SshConfig};
pub use error::{ConnectError, SshError};
pub use exec::{Command, CommandOutput, ExecError};
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use known_hosts::{HostKeyVerification, HostKeyVerifier, KnownHostsStore};
pub use session::{ChannelGuard, CommandChannel, RemoteFsHandle, Session};
pub use transport::{ExecChannel, ExecEvent, RusshExecChannel, RusshTransport, Transport};
