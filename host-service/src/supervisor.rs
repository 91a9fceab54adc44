// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{
    collections::VecDeque,
    fmt::Write as _,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use gamehost_common::{GameProfile, GameProfileLookup};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, Command},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub const DEFAULT_LOG_MAX_LINES: usize = 500;

/// How long stdout/stderr forwarders may keep draining after the process is gone.
const FORWARDER_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopTimings {
    pub warning_delay: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for StopTimings {
    fn default() -> Self {
        Self {
            warning_delay: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
pub enum StopOutcome {
    /// The process exited on its own after the stop command.
    Exited(ExitStatus),
    Killed,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("no configuration for game: {0}")]
    NotConfigured(String),
    #[error("no game server is currently running")]
    NotRunning,
    #[error("failed to launch {game}: {source}")]
    Spawn {
        game: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write to game server stdin: {0}")]
    StdinWrite(#[source] std::io::Error),
    #[error("failed waiting for game server to exit: {0}")]
    Wait(#[source] std::io::Error),
    #[error("failed to kill game server: {0}")]
    Kill(#[source] std::io::Error),
}

/// The game-server operations the command dispatcher and the shutdown
/// coordinator depend on.
#[async_trait]
pub trait GameServer: Send + Sync {
    fn running_game(&self) -> Option<String>;

    fn is_configured(&self, game: &str) -> bool;

    async fn run(&self, game: &str) -> Result<(), SupervisorError>;

    async fn stop(&self) -> Result<StopOutcome, SupervisorError>;
}

#[derive(Debug)]
struct OutputBuffer {
    max_lines: usize,
    lines: VecDeque<String>,
}

impl OutputBuffer {
    fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            lines: VecDeque::new(),
        }
    }

    fn push_line(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    fn tail(&self, limit: usize) -> Vec<String> {
        let start = self.lines.len().saturating_sub(limit);
        self.lines.iter().skip(start).cloned().collect()
    }
}

/// A launched game server. Dropping it kills the child.
struct GameProcess {
    profile: GameProfile,
    child: Child,
    stdin: Option<ChildStdin>,
    forwarders: Vec<JoinHandle<()>>,
}

impl GameProcess {
    /// Console writes are best effort: a process that already exited has
    /// closed its stdin, and the exit is picked up by the wait that follows.
    async fn write_line(&mut self, line: &str) {
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };
        let result = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;
        if let Err(error) = result {
            let error = SupervisorError::StdinWrite(error);
            warn!(game = %self.profile.name, error = %error, "console write failed");
        }
    }

    async fn finish_forwarders(&mut self) {
        for mut handle in self.forwarders.drain(..) {
            if tokio::time::timeout(FORWARDER_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }
}

/// Owns at most one running game server process.
pub struct ProcessSupervisor {
    profiles: Arc<dyn GameProfileLookup>,
    timings: StopTimings,
    current: tokio::sync::Mutex<Option<GameProcess>>,
    running: Mutex<Option<String>>,
    output: Arc<Mutex<OutputBuffer>>,
}

impl ProcessSupervisor {
    pub fn new(
        profiles: Arc<dyn GameProfileLookup>,
        timings: StopTimings,
        max_output_lines: usize,
    ) -> Self {
        Self {
            profiles,
            timings,
            current: tokio::sync::Mutex::new(None),
            running: Mutex::new(None),
            output: Arc::new(Mutex::new(OutputBuffer::new(max_output_lines))),
        }
    }

    /// Launches `game`, stopping whatever runs first. If that stop fails
    /// nothing is tracked afterwards.
    pub async fn run(&self, game: &str) -> Result<(), SupervisorError> {
        let profile = self
            .profiles
            .lookup(game)
            .ok_or_else(|| SupervisorError::NotConfigured(game.to_string()))?;

        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            info!(
                running = %previous.profile.name,
                next = %profile.name,
                "stopping running game server before launch"
            );
            self.shutdown(previous).await?;
        }

        let process = self.launch(profile)?;
        self.set_running(Some(process.profile.name.clone()));
        *current = Some(process);
        Ok(())
    }

    /// Tracking is cleared whatever the outcome.
    pub async fn stop(&self) -> Result<StopOutcome, SupervisorError> {
        let mut current = self.current.lock().await;
        let Some(process) = current.take() else {
            return Err(SupervisorError::NotRunning);
        };
        self.shutdown(process).await
    }

    pub fn is_running(&self) -> Option<String> {
        self.running.lock().ok().and_then(|name| name.clone())
    }

    pub fn is_configured(&self, game: &str) -> bool {
        self.profiles.lookup(game).is_some()
    }

    /// Most recent console lines, prefixed with the stream they came from.
    pub fn recent_output(&self, limit: usize) -> Vec<String> {
        self.output
            .lock()
            .map(|buffer| buffer.tail(limit))
            .unwrap_or_default()
    }

    fn set_running(&self, name: Option<String>) {
        if let Ok(mut running) = self.running.lock() {
            *running = name;
        }
    }

    fn launch(&self, profile: GameProfile) -> Result<GameProcess, SupervisorError> {
        let spawn_error = |source| SupervisorError::Spawn {
            game: profile.name.clone(),
            source,
        };
        let working_dir = resolve_working_dir(&profile.working_dir).map_err(spawn_error)?;

        let mut command = Command::new(&profile.run.command);
        command
            .args(&profile.run.args)
            .current_dir(&working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(spawn_error)?;

        let stdin = child.stdin.take();
        let mut forwarders = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(self.forward_output(profile.name.clone(), "stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(self.forward_output(profile.name.clone(), "stderr", stderr));
        }

        info!(
            game = %profile.name,
            pid = child.id().unwrap_or_default(),
            working_dir = %working_dir.display(),
            "game server launched"
        );
        Ok(GameProcess {
            profile,
            child,
            stdin,
            forwarders,
        })
    }

    fn forward_output<R>(&self, game: String, stream: &'static str, reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let output = self.output.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(game = %game, stream, "{line}");
                if let Ok(mut buffer) = output.lock() {
                    buffer.push_line(format!("[{stream}] {line}"));
                }
            }
        })
    }

    async fn shutdown(&self, mut process: GameProcess) -> Result<StopOutcome, SupervisorError> {
        let game = process.profile.name.clone();
        let warning = format!(
            "{} Server shutting down in {}",
            process.profile.message,
            format_delay(self.timings.warning_delay)
        );
        let stop_command = process.profile.stop.clone();

        info!(game = %game, delay = ?self.timings.warning_delay, "warning players of shutdown");
        process.write_line(warning.trim_start()).await;
        tokio::time::sleep(self.timings.warning_delay).await;

        info!(game = %game, "sending stop command");
        process.write_line(&stop_command).await;

        let waited = tokio::time::timeout(self.timings.shutdown_timeout, process.child.wait()).await;
        let outcome = match waited {
            Ok(Ok(status)) => {
                info!(game = %game, status = %status, "game server exited");
                Ok(StopOutcome::Exited(status))
            }
            Ok(Err(error)) => Err(SupervisorError::Wait(error)),
            Err(_) => {
                warn!(
                    game = %game,
                    timeout = ?self.timings.shutdown_timeout,
                    recent_output = ?self.recent_output(10),
                    "game server ignored stop command; killing"
                );
                process
                    .child
                    .kill()
                    .await
                    .map(|()| StopOutcome::Killed)
                    .map_err(SupervisorError::Kill)
            }
        };

        drop(process.stdin.take());
        process.finish_forwarders().await;
        self.set_running(None);
        outcome
    }
}

#[async_trait]
impl GameServer for ProcessSupervisor {
    fn running_game(&self) -> Option<String> {
        self.is_running()
    }

    fn is_configured(&self, game: &str) -> bool {
        ProcessSupervisor::is_configured(self, game)
    }

    async fn run(&self, game: &str) -> Result<(), SupervisorError> {
        ProcessSupervisor::run(self, game).await
    }

    async fn stop(&self) -> Result<StopOutcome, SupervisorError> {
        ProcessSupervisor::stop(self).await
    }
}

fn resolve_working_dir(working_dir: &str) -> std::io::Result<PathBuf> {
    if working_dir.trim().is_empty() {
        return std::env::current_dir();
    }
    std::path::absolute(Path::new(working_dir))
}

/// Renders a delay the way players expect to read it, e.g. `30s` or `1m30s`.
fn format_delay(delay: Duration) -> String {
    let total = delay.as_secs();
    let millis = delay.subsec_millis();
    if total == 0 && millis > 0 {
        return format!("{millis}ms");
    }

    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{hours}h");
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{minutes}m");
    }
    if millis > 0 {
        let fraction = format!("{millis:03}");
        let _ = write!(out, "{seconds}.{}s", fraction.trim_end_matches('0'));
    } else {
        let _ = write!(out, "{seconds}s");
    }
    out
}
