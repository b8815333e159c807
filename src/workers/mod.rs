use crate::config::ShakeConfig;
use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use tracing::{error, info, warn};

/// One live map-generation run.
struct RunningJob {
    child: Child,
    started: i64,
    action: String,
}

/// Tracks at most one `shake` child per event id. All access happens on
/// the control thread; children communicate only via exit status.
#[derive(Default)]
pub struct ChildSet {
    jobs: HashMap<String, RunningJob>,
}

impl ChildSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// The trigger string that launched the live child for `id`, if any.
    pub fn running_action(&self, id: &str) -> Option<&str> {
        self.jobs.get(id).map(|job| job.action.as_str())
    }

    /// Launch the map generator for one event. A live child for the same
    /// id makes this a no-op; spawn failure is logged and leaves the event
    /// un-dispatched.
    pub fn spawn(&mut self, shake: &ShakeConfig, id: &str, action: &str, now: i64) {
        if self.jobs.contains_key(id) {
            warn!(id, action, "child already running; not spawning another");
            return;
        }
        match build_command(shake, id, action).and_then(|mut cmd| {
            cmd.spawn()
                .with_context(|| format!("spawn {}", shake.command))
        }) {
            Ok(child) => {
                info!(id, action, pid = child.id(), "launched shake");
                self.jobs.insert(
                    id.to_string(),
                    RunningJob {
                        child,
                        started: now,
                        action: action.to_string(),
                    },
                );
            }
            Err(err) => error!(id, action, err = %err, "could not launch shake"),
        }
    }

    /// Poll every tracked child and drop those that have exited. Never
    /// blocks.
    pub fn reap(&mut self, now: i64) {
        self.jobs.retain(|id, job| match job.child.try_wait() {
            Ok(Some(status)) => {
                let runtime = now - job.started;
                if status.success() {
                    info!(id, action = %job.action, runtime, "shake finished");
                } else {
                    warn!(id, action = %job.action, runtime, status = %status, "shake exited abnormally");
                }
                false
            }
            Ok(None) => true,
            Err(err) => {
                error!(id, err = %err, "could not poll child");
                true
            }
        });
    }

    /// Terminate the child for `id` and wait for it to exit. Used only
    /// while absorbing an alias identity.
    pub fn kill_and_wait(&mut self, id: &str) -> Result<()> {
        let Some(mut job) = self.jobs.remove(id) else {
            return Ok(());
        };
        job.child
            .kill()
            .with_context(|| format!("terminate child for event {id}"))?;
        let status = job
            .child
            .wait()
            .with_context(|| format!("wait for child of event {id}"))?;
        info!(id, status = %status, "terminated running child");
        Ok(())
    }
}

fn build_command(shake: &ShakeConfig, id: &str, action: &str) -> Result<Command> {
    let mut parts = shake.command.split_whitespace();
    let Some(program) = parts.next() else {
        bail!("empty shake command");
    };
    let modules = if action == "cancel" {
        &shake.cancel_modules
    } else {
        &shake.autorun_modules
    };
    let mut cmd = Command::new(program);
    cmd.args(parts)
        .arg(id)
        .args(modules)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    Ok(cmd)
}
