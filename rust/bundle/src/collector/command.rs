use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use snafu::{OptionExt, ResultExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{
    CanceledSnafu, Collected, Collector, CommandTimeoutSnafu, EmptyCommandSnafu, Error,
    RunCommandSnafu,
};

/// Runs an external program and captures its output, stdout first, then
/// stderr. The child is killed when the deadline or the cancellation token
/// fires.
pub struct CommandCollector {
    name: String,
    optional: bool,
    command: Vec<String>,
    timeout: Duration,
}

impl CommandCollector {
    pub fn new(
        name: impl Into<String>,
        optional: bool,
        command: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            optional,
            command,
            timeout,
        }
    }
}

#[async_trait]
impl Collector for CommandCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn optional(&self) -> bool {
        self.optional
    }

    async fn collect(&self, cancel: &CancellationToken) -> Result<Collected, Error> {
        if cancel.is_cancelled() {
            return CanceledSnafu.fail();
        }
        let (program, args) = self.command.split_first().context(EmptyCommandSnafu)?;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(RunCommandSnafu {
                command: self.command.clone(),
            })?;

        // wait_with_output owns the child; dropping the future on the other
        // select arms kills the process via kill_on_drop
        let output = tokio::select! {
            output = child.wait_with_output() => output.context(RunCommandSnafu {
                command: self.command.clone(),
            })?,
            _ = tokio::time::sleep(self.timeout) => {
                return CommandTimeoutSnafu {
                    command: self.command.clone(),
                    timeout: self.timeout,
                }
                .fail();
            }
            _ = cancel.cancelled() => return CanceledSnafu.fail(),
        };

        if !output.status.success() {
            tracing::debug!(
                collector.name = %self.name,
                exit = %output.status,
                "command exited non-zero, keeping its output"
            );
        }
        let chunks = [output.stdout, output.stderr]
            .into_iter()
            .filter(|buffer| !buffer.is_empty())
            .map(|buffer| Ok(Bytes::from(buffer)));
        Ok(Collected::plain(futures::stream::iter(chunks).boxed()))
    }
}
