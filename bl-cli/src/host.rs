/*!
 * Host Integration
 * Sessions with the control utility and privileged one-shot commands
 */

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ActionError, SessionError};
use crate::session::{ChildSession, Session, CONTROL_UTILITY};

/// Everything the actions need from the machine they run on
#[async_trait]
pub trait Host: Send + Sync {
    type Reader: AsyncRead + Unpin + Send;
    type Writer: AsyncWrite + Unpin + Send;

    fn open_session(&self) -> Result<Session<Self::Reader, Self::Writer>, SessionError>;

    /// Runs a privileged command to completion; `step` names it in errors.
    async fn run(&self, step: &str, program: &str, args: &[&str]) -> Result<(), ActionError>;
}

pub struct SystemHost {
    timeout: Duration,
    cancel: CancellationToken,
}

impl SystemHost {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }
}

#[async_trait]
impl Host for SystemHost {
    type Reader = ChildStdout;
    type Writer = ChildStdin;

    fn open_session(&self) -> Result<ChildSession, SessionError> {
        ChildSession::open(CONTROL_UTILITY, self.timeout, self.cancel.clone())
    }

    async fn run(&self, step: &str, program: &str, args: &[&str]) -> Result<(), ActionError> {
        info!("{}: sudo {} {}", step, program, args.join(" "));

        let mut command = Command::new("sudo");
        command.arg(program).args(args).kill_on_drop(true);

        let status = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SessionError::Interrupted.into()),
            status = command.status() => status.map_err(|source| ActionError::OsCommandSpawn {
                step: step.to_string(),
                source,
            })?,
        };

        debug!(step, %status, "Command finished");
        if !status.success() {
            return Err(ActionError::OsCommand {
                step: step.to_string(),
                status,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_run_is_an_interrupt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let host = SystemHost::new(Duration::from_secs(1), cancel);

        let err = host.run("restart", "true", &[]).await.unwrap_err();
        assert!(err.is_interrupt());
    }
}
