//! sshcopy - remote command execution and file tree transfer over SSH
//!
//! A [`Session`] owns one authenticated connection. Commands and SFTP
//! transfers each run on their own sub-channel of that connection.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use sshcopy::{AuthMethod, Session, SshConfig};
//!
//! let config = SshConfig::with_known_hosts("deploy", "build.example.com", AuthMethod::Agent);
//! let session = Session::establish(config).await?;
//!
//! let out = session.run("uname -a").await?;
//! println!("{}", out.to_string_lossy());
//!
//! session.upload("./dist", "/srv/app").await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod sftp;
pub mod ssh;

#[cfg(test)]
pub(crate) mod testing;

pub use logging::init_logging;
pub use sftp::{SftpError, TransferSummary};
pub use ssh::{
    AuthMethod, Command, CommandOutput, ConnectError, ExecError, HostKeyPolicy, Session,
    SshConfig, SshError,
};
