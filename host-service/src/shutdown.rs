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

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    backup::SaveBackup,
    dispatch::CommandDispatcher,
    monitor::InactivityMonitor,
    supervisor::{GameServer, SupervisorError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStep {
    StopGame,
    Backup,
}

/// Tears the host down once it has gone idle. Every step runs even when an
/// earlier one failed; the failed steps are returned.
pub struct ShutdownCoordinator {
    dispatcher: Arc<CommandDispatcher>,
    games: Arc<dyn GameServer>,
    monitor: Arc<InactivityMonitor>,
    listener: CancellationToken,
    backup: Arc<dyn SaveBackup>,
}

impl ShutdownCoordinator {
    pub fn new(
        dispatcher: Arc<CommandDispatcher>,
        games: Arc<dyn GameServer>,
        monitor: Arc<InactivityMonitor>,
        listener: CancellationToken,
        backup: Arc<dyn SaveBackup>,
    ) -> Self {
        Self {
            dispatcher,
            games,
            monitor,
            listener,
            backup,
        }
    }

    pub async fn run(self) -> Vec<ShutdownStep> {
        let mut failed = Vec::new();

        info!("waiting for in-flight game commands");
        self.dispatcher.shut_down().await;

        if let Some(game) = self.games.running_game() {
            info!(game = %game, "stopping game server");
            match self.games.stop().await {
                Ok(outcome) => info!(game = %game, outcome = ?outcome, "game server stopped"),
                Err(SupervisorError::NotRunning) => {
                    info!(game = %game, "game server already stopped")
                }
                Err(error) => {
                    error!(game = %game, error = %error, "failed to stop game server");
                    failed.push(ShutdownStep::StopGame);
                }
            }
        }

        self.monitor.close();

        info!("stopping listener");
        self.listener.cancel();

        info!("backing up game saves");
        if let Err(error) = self.backup.backup().await {
            error!(error = %format!("{error:#}"), "failed to back up game saves");
            failed.push(ShutdownStep::Backup);
        }

        info!(failed = ?failed, "shutdown complete");
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dispatch::tests::{FakeGames, RecordingChat, command},
        monitor::{CaptureOpener, MonitorError, PacketSource},
    };
    use async_trait::async_trait;
    use std::{sync::Mutex, time::Duration};

    struct QuietCapture;

    impl CaptureOpener for QuietCapture {
        fn open(&self, _filter: &str) -> Result<Box<dyn PacketSource>, MonitorError> {
            Ok(Box::new(QuietCapture))
        }
    }

    impl PacketSource for QuietCapture {
        fn next_packet(&mut self) -> Result<Option<std::time::SystemTime>, MonitorError> {
            std::thread::sleep(Duration::from_millis(10));
            Ok(None)
        }
    }

    /// Records what had already happened by the time backup ran.
    struct ObservingBackup {
        games: Arc<FakeGames>,
        listener: CancellationToken,
        monitor_done: CancellationToken,
        observed: Mutex<Option<(Vec<String>, bool, bool)>>,
        fail: bool,
    }

    #[async_trait]
    impl SaveBackup for ObservingBackup {
        async fn backup(&self) -> anyhow::Result<()> {
            *self.observed.lock().unwrap() = Some((
                self.games.calls(),
                self.monitor_done.is_cancelled(),
                self.listener.is_cancelled(),
            ));
            if self.fail {
                anyhow::bail!("forced backup error");
            }
            Ok(())
        }
    }

    fn setup(
        games: FakeGames,
        fail_backup: bool,
    ) -> (ShutdownCoordinator, Arc<ObservingBackup>, CancellationToken) {
        let games = Arc::new(games);
        let monitor = Arc::new(InactivityMonitor::new(
            Arc::new(QuietCapture),
            Duration::from_secs(60),
            Duration::from_millis(50),
        ));
        let monitor_done = monitor.start(&[2456]).unwrap();
        let listener = CancellationToken::new();
        let backup = Arc::new(ObservingBackup {
            games: games.clone(),
            listener: listener.clone(),
            monitor_done,
            observed: Mutex::new(None),
            fail: fail_backup,
        });
        let dispatcher = Arc::new(CommandDispatcher::new(
            games.clone(),
            Arc::new(RecordingChat::default()),
        ));
        let coordinator =
            ShutdownCoordinator::new(dispatcher, games, monitor, listener.clone(), backup.clone());
        (coordinator, backup, listener)
    }

    #[tokio::test]
    async fn steps_run_in_order() {
        let (coordinator, backup, listener) =
            setup(FakeGames::with(&["valheim"], Some("valheim")), false);

        let failed = coordinator.run().await;

        assert!(failed.is_empty());
        assert!(listener.is_cancelled());
        let observed = backup.observed.lock().unwrap().clone().unwrap();
        assert_eq!(observed, (vec!["stop".to_string()], true, true));
    }

    #[tokio::test]
    async fn idle_host_without_game_skips_stop() {
        let (coordinator, backup, _listener) = setup(FakeGames::with(&["valheim"], None), false);

        let failed = coordinator.run().await;

        assert!(failed.is_empty());
        let observed = backup.observed.lock().unwrap().clone().unwrap();
        assert!(observed.0.is_empty());
    }

    #[tokio::test]
    async fn failures_do_not_stop_later_steps() {
        let games = FakeGames {
            fail_stop: true,
            ..FakeGames::with(&["valheim"], Some("valheim"))
        };
        let (coordinator, backup, listener) = setup(games, true);

        let failed = coordinator.run().await;

        assert_eq!(failed, vec![ShutdownStep::StopGame, ShutdownStep::Backup]);
        assert!(listener.is_cancelled());
        let observed = backup.observed.lock().unwrap().clone().unwrap();
        assert_eq!(observed, (vec!["stop".to_string()], true, true));
    }

    #[tokio::test]
    async fn in_flight_stop_finishes_before_shutdown_checks_the_game() {
        let games = FakeGames {
            stop_delay: Duration::from_millis(100),
            ..FakeGames::with(&["valheim"], Some("valheim"))
        };
        let (coordinator, backup, _listener) = setup(games, false);
        coordinator
            .dispatcher
            .dispatch(&command("stop", Some("valheim")))
            .await
            .unwrap();

        let failed = coordinator.run().await;

        assert!(failed.is_empty());
        let observed = backup.observed.lock().unwrap().clone().unwrap();
        assert_eq!(observed.0, vec!["stop".to_string()]);
    }

    #[tokio::test]
    async fn game_already_stopped_is_not_a_failure() {
        let games = Arc::new(FakeGames::with(&["valheim"], Some("valheim")));
        *games.running.lock().unwrap() = None;
        let coordinator = ShutdownCoordinator::new(
            Arc::new(CommandDispatcher::new(
                games.clone(),
                Arc::new(RecordingChat::default()),
            )),
            Arc::new(RacingGames(games.clone())),
            Arc::new(InactivityMonitor::new(
                Arc::new(QuietCapture),
                Duration::from_secs(60),
                Duration::from_millis(50),
            )),
            CancellationToken::new(),
            Arc::new(crate::backup::DisabledBackup),
        );

        let failed = coordinator.run().await;

        assert!(failed.is_empty());
        assert_eq!(games.calls(), vec!["stop"]);
    }

    /// Reports a running game that is gone by the time it is stopped.
    struct RacingGames(Arc<FakeGames>);

    #[async_trait]
    impl GameServer for RacingGames {
        fn running_game(&self) -> Option<String> {
            Some("valheim".to_string())
        }

        fn is_configured(&self, game: &str) -> bool {
            self.0.is_configured(game)
        }

        async fn run(&self, game: &str) -> Result<(), SupervisorError> {
            self.0.run(game).await
        }

        async fn stop(&self) -> Result<crate::supervisor::StopOutcome, SupervisorError> {
            self.0.stop().await
        }
    }
}
