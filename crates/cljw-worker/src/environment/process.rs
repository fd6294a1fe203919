//! Guest-host-backed environments.
//!
//! Each environment is a child process speaking the guest host protocol on
//! its stdin/stdout. The child's stderr is inherited so guest diagnostics
//! land in the worker log, never on the worker's protocol channel.

use std::collections::BTreeSet;
use std::fs;
use std::io::BufReader;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use cljw_protocol::{read_message, write_message, GuestCommand, GuestReply};

use super::{Environment, EnvironmentError, EnvironmentFactory, Invocation};
use crate::config::WorkerConfig;
use crate::identity::{EnvironmentId, EnvironmentIds, UnitId};
use crate::roles::Role;

/// Environment variable telling the guest host which role it serves.
pub const ROLE_ENV: &str = "CLJW_ROLE";

/// Environment variable carrying the environment identity.
pub const ENVIRONMENT_ID_ENV: &str = "CLJW_ENVIRONMENT_ID";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Spawns one guest host per environment.
#[derive(Debug)]
pub struct ProcessEnvironmentFactory {
    command: Vec<String>,
    shutdown_grace: Duration,
    max_message_bytes: usize,
    ids: EnvironmentIds,
}

impl ProcessEnvironmentFactory {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            command: config.guest.command.clone(),
            shutdown_grace: config.shutdown_grace(),
            max_message_bytes: config.max_message_bytes,
            ids: EnvironmentIds::new(),
        }
    }

    /// Number of environments created so far.
    pub fn created(&self) -> u64 {
        self.ids.issued()
    }
}

impl EnvironmentFactory for ProcessEnvironmentFactory {
    fn create(&mut self, role: Role) -> Result<Box<dyn Environment>, EnvironmentError> {
        let id = self.ids.allocate();
        let env = ProcessEnvironment::spawn(
            id,
            role,
            &self.command,
            self.shutdown_grace,
            self.max_message_bytes,
        )?;
        Ok(Box::new(env))
    }
}

/// An environment living in a guest host process.
pub struct ProcessEnvironment {
    id: EnvironmentId,
    role: Role,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    locations: Vec<String>,
    units: BTreeSet<UnitId>,
    shutdown_grace: Duration,
    max_message_bytes: usize,
    released: bool,
}

impl ProcessEnvironment {
    /// Start a guest host.
    pub fn spawn(
        id: EnvironmentId,
        role: Role,
        command: &[String],
        shutdown_grace: Duration,
        max_message_bytes: usize,
    ) -> Result<Self, EnvironmentError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| EnvironmentError::InvalidCommand("guest command is empty".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .env(ROLE_ENV, role.as_str())
            .env(ENVIRONMENT_ID_ENV, id.get().to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| EnvironmentError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let stdout = match child.stdout.take() {
            Some(stdout) => BufReader::new(stdout),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EnvironmentError::Closed);
            }
        };

        info!(environment = %id, %role, pid = child.id(), "guest host started");

        Ok(Self {
            id,
            role,
            child,
            stdin,
            stdout,
            locations: Vec::new(),
            units: BTreeSet::new(),
            shutdown_grace,
            max_message_bytes,
            released: false,
        })
    }

    /// Send one command and wait for its reply.
    fn request(&mut self, command: &GuestCommand) -> Result<GuestReply, EnvironmentError> {
        let stdin = self.stdin.as_mut().ok_or(EnvironmentError::Closed)?;
        write_message(stdin, command)?;
        read_message(&mut self.stdout, self.max_message_bytes)?.ok_or(EnvironmentError::Closed)
    }

    /// Ask the guest host to exit, then escalate if it does not.
    fn release(&mut self) -> Result<(), EnvironmentError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = write_message(&mut stdin, &GuestCommand::Shutdown) {
                debug!(environment = %self.id, error = %e, "shutdown command not delivered");
            }
        }

        if self.wait_for_exit(self.shutdown_grace)? {
            return Ok(());
        }

        warn!(environment = %self.id, "guest host ignored shutdown, terminating");
        self.terminate()
    }

    /// Poll until the child exits or `grace` elapses. Returns whether it exited.
    fn wait_for_exit(&mut self, grace: Duration) -> Result<bool, EnvironmentError> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                debug!(environment = %self.id, %status, "guest host exited");
                return Ok(true);
            }
            if start.elapsed() >= grace {
                return Ok(false);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Terminate the guest host gracefully then forcefully.
    fn terminate(&mut self) -> Result<(), EnvironmentError> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            let _ = signal::kill(pid, Signal::SIGTERM);
        }

        if self.wait_for_exit(self.shutdown_grace)? {
            return Ok(());
        }

        let _ = self.child.kill();
        self.child.wait()?;
        Ok(())
    }
}

impl Environment for ProcessEnvironment {
    fn id(&self) -> EnvironmentId {
        self.id
    }

    fn role(&self) -> Role {
        self.role
    }

    fn locations(&self) -> &[String] {
        &self.locations
    }

    fn add_location(&mut self, location: &str) -> Result<bool, EnvironmentError> {
        if self.has_location(location) {
            return Ok(false);
        }

        fs::metadata(location).map_err(|e| EnvironmentError::Resolution {
            location: location.to_string(),
            reason: e.to_string(),
        })?;

        let command = GuestCommand::AddLocation {
            path: location.to_string(),
        };
        match self.request(&command)? {
            GuestReply::Ok { .. } => {
                self.locations.push(location.to_string());
                Ok(true)
            }
            GuestReply::Error { message, .. } => Err(EnvironmentError::Resolution {
                location: location.to_string(),
                reason: message,
            }),
        }
    }

    fn invoke(&mut self, entry_point: &str, payload: &str) -> Result<Invocation, EnvironmentError> {
        let command = GuestCommand::Invoke {
            entry_point: entry_point.to_string(),
            payload: payload.to_string(),
        };
        match self.request(&command)? {
            GuestReply::Ok {
                value,
                output,
                defined,
            } => {
                let owner = self.id;
                self.units
                    .extend(defined.into_iter().map(|name| UnitId::new(owner, name)));
                Ok(Invocation { value, output })
            }
            GuestReply::Error { message, output } => Err(EnvironmentError::Guest {
                entry_point: entry_point.to_string(),
                message,
                output,
            }),
        }
    }

    fn units(&self) -> &BTreeSet<UnitId> {
        &self.units
    }

    fn discard(mut self: Box<Self>) -> Result<(), EnvironmentError> {
        info!(environment = %self.id, role = %self.role, "discarding guest host");
        self.release()
    }
}

impl Drop for ProcessEnvironment {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(environment = %self.id, error = %e, "failed to release guest host");
        }
    }
}
