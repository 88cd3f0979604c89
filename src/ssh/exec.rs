//! Remote command execution
//!
//! Each invocation opens its own command sub-channel, runs to completion (or
//! cancellation), and closes the sub-channel before returning. Stdout and
//! stderr are merged in arrival order.

use std::collections::VecDeque;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::SshError;
use super::session::{CommandChannel, Session};
use super::transport::ExecEvent;

/// Combined output of a command that exited with status 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: Vec<u8>,
    pub exit_status: u32,
}

impl CommandOutput {
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Command failure. Every variant produced after the command started keeps
/// the output gathered so far.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error(transparent)]
    Channel(#[from] SshError),

    #[error("Remote command exited with status {exit_status}")]
    NonZeroExit { exit_status: u32, output: Vec<u8> },

    #[error("Remote command terminated by signal {signal}")]
    Signal { signal: String, output: Vec<u8> },

    #[error("Remote command exited without reporting a status")]
    MissingExitStatus { output: Vec<u8> },

    #[error("Remote command cancelled")]
    Cancelled { output: Vec<u8> },

    /// The command succeeded but its channel did not close cleanly
    #[error("Failed to close command channel: {source}")]
    Close {
        source: SshError,
        exit_status: u32,
        output: Vec<u8>,
    },
}

impl ExecError {
    /// Output collected before the failure, empty for channel errors
    pub fn output(&self) -> &[u8] {
        match self {
            ExecError::Channel(_) => &[],
            ExecError::NonZeroExit { output, .. }
            | ExecError::Signal { output, .. }
            | ExecError::MissingExitStatus { output }
            | ExecError::Cancelled { output }
            | ExecError::Close { output, .. } => output,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecError::Cancelled { .. })
    }
}

/// A program with separately quoted arguments and environment
#[derive(Debug, Clone, Default)]
pub struct Command {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Environment variable sent before the command starts. Servers only
    /// honour names allowed by their `AcceptEnv`.
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((name.into(), value.into()));
        self
    }

    /// The shell line sent to the server
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|a| shell_quote(a)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub async fn run(&self, session: &Session) -> Result<CommandOutput, ExecError> {
        execute(session, &self.command_line(), &self.env, None).await
    }

    pub async fn run_cancellable(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ExecError> {
        execute(session, &self.command_line(), &self.env, Some(cancel)).await
    }
}

/// POSIX single-quote an argument unless it is plainly safe
fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

/// What came back from the channel before it closed
#[derive(Default)]
struct Collected {
    output: Vec<u8>,
    exit_status: Option<u32>,
    signal: Option<String>,
}

impl Collected {
    fn into_result(self) -> Result<CommandOutput, ExecError> {
        match (self.exit_status, self.signal) {
            (Some(0), _) => Ok(CommandOutput {
                output: self.output,
                exit_status: 0,
            }),
            (Some(exit_status), _) => Err(ExecError::NonZeroExit {
                exit_status,
                output: self.output,
            }),
            (None, Some(signal)) => Err(ExecError::Signal {
                signal,
                output: self.output,
            }),
            (None, None) => Err(ExecError::MissingExitStatus {
                output: self.output,
            }),
        }
    }
}

/// Run `command_line` on a fresh sub-channel of `session`.
///
/// The sub-channel is closed before returning on every path. A close error
/// is returned only when the command itself succeeded, as
/// [`ExecError::Close`] with the output.
pub(crate) async fn execute(
    session: &Session,
    command_line: &str,
    env: &[(String, String)],
    cancel: Option<&CancellationToken>,
) -> Result<CommandOutput, ExecError> {
    let never = CancellationToken::new();
    let cancel = cancel.unwrap_or(&never);

    if cancel.is_cancelled() {
        debug!("Command cancelled before start: {}", command_line);
        return Err(ExecError::Cancelled { output: Vec::new() });
    }

    let mut channel = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ExecError::Cancelled { output: Vec::new() }),
        channel = session.open_command_channel() => channel?,
    };

    info!("Running remote command on session {}: {}", session.id(), command_line);

    let outcome = drive(&mut channel, command_line, env, cancel, session.shutdown_token())
        .await
        .and_then(Collected::into_result);

    match (outcome, channel.close().await) {
        (Ok(done), Err(source)) => Err(ExecError::Close {
            source,
            exit_status: done.exit_status,
            output: done.output,
        }),
        (Err(e), Err(close_err)) => {
            warn!("Failed to close command channel after error ({}): {}", e, close_err);
            Err(e)
        }
        (outcome, Ok(())) => outcome,
    }
}

/// A channel request still waiting for its reply
enum Request<'a> {
    Env(&'a str),
    Exec,
}

async fn drive(
    channel: &mut CommandChannel,
    command_line: &str,
    env: &[(String, String)],
    cancel: &CancellationToken,
    shutdown: &CancellationToken,
) -> Result<Collected, ExecError> {
    // Replies to want-reply requests come back in the order they were sent
    let mut awaiting = VecDeque::with_capacity(env.len() + 1);
    for (name, value) in env {
        channel.set_env(name, value).await?;
        awaiting.push_back(Request::Env(name.as_str()));
    }
    channel.exec(command_line).await?;
    awaiting.push_back(Request::Exec);

    let mut collected = Collected::default();
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Remote command cancelled: {}", command_line);
                return Err(ExecError::Cancelled { output: collected.output });
            }
            _ = shutdown.cancelled() => return Err(SshError::SessionClosed.into()),
            event = channel.next_event() => event,
        };

        match event {
            None => break,
            Some(ExecEvent::Stdout(data)) | Some(ExecEvent::Stderr(data)) => {
                collected.output.extend_from_slice(&data)
            }
            Some(ExecEvent::ExitStatus(status)) => {
                debug!("Remote command exit status {}", status);
                collected.exit_status = Some(status);
            }
            Some(ExecEvent::ExitSignal(signal)) => {
                debug!("Remote command exit signal {}", signal);
                collected.signal = Some(signal);
            }
            Some(ExecEvent::RequestSuccess) => {
                awaiting.pop_front();
            }
            Some(ExecEvent::RequestFailure) => match awaiting.pop_front() {
                Some(Request::Env(name)) => {
                    warn!("Server refused environment variable {}", name);
                }
                Some(Request::Exec) => {
                    return Err(SshError::Rejected(format!("exec of {:?}", command_line)).into())
                }
                None => debug!("Ignoring unsolicited request failure"),
            },
            Some(ExecEvent::Eof) => {}
        }
    }

    Ok(collected)
}
