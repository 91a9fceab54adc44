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

use std::sync::{Arc, Mutex};

use gamehost_common::{
    InteractionRequest, InteractionResponse, InteractionType, START_COMMAND, STOP_COMMAND,
};
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::{discord::ChatClient, supervisor::GameServer};

pub const SHUTTING_DOWN: &str = "Host is shutting down";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unsupported interaction type {0:?}")]
    UnsupportedType(InteractionType),
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),
    #[error("command {0} is missing the game option")]
    MissingGame(String),
}

/// Turns a chat command into a reply, kicking off slow game-server work in
/// the background. Shared by live requests and the startup drain.
pub struct CommandDispatcher {
    games: Arc<dyn GameServer>,
    chat: Arc<dyn ChatClient>,
    tasks: TaskTracker,
    closed: Mutex<bool>,
}

impl CommandDispatcher {
    pub fn new(games: Arc<dyn GameServer>, chat: Arc<dyn ChatClient>) -> Self {
        Self {
            games,
            chat,
            tasks: TaskTracker::new(),
            closed: Mutex::new(false),
        }
    }

    pub async fn dispatch(
        &self,
        request: &InteractionRequest,
    ) -> Result<InteractionResponse, DispatchError> {
        match request.kind {
            InteractionType::Ping => return Ok(InteractionResponse::pong()),
            InteractionType::Command => {}
            other => return Err(DispatchError::UnsupportedType(other)),
        }

        let command = request.command_name.as_str();
        if command != START_COMMAND && command != STOP_COMMAND {
            return Err(DispatchError::UnsupportedCommand(command.to_string()));
        }
        let game = request
            .game_argument
            .clone()
            .ok_or_else(|| DispatchError::MissingGame(command.to_string()))?;

        let closed = self.closed.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *closed {
            info!(command, game = %game, "ignoring command during shutdown");
            return Ok(InteractionResponse::message(SHUTTING_DOWN));
        }

        info!(command, game = %game, channel_id = %request.channel_id, "dispatching command");
        let response = if command == START_COMMAND {
            self.start(game, &request.channel_id)
        } else {
            self.stop(game, &request.channel_id)
        };
        Ok(response)
    }

    /// Waits for every background start/stop spawned so far.
    pub async fn wait_for_background_tasks(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Refuses further start/stop commands, then waits for the ones already
    /// running in the background.
    pub async fn shut_down(&self) {
        *self.closed.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn start(&self, game: String, channel_id: &str) -> InteractionResponse {
        if !self.games.is_configured(&game) {
            return InteractionResponse::message(format!("No configuration for game: {game}"));
        }
        if let Some(running) = self.games.running_game() {
            return InteractionResponse::message(format!(
                "Cannot start {game} server because {running} is already running"
            ));
        }

        let reply = format!("Starting {game} game server");
        let games = self.games.clone();
        let chat = self.chat.clone();
        let channel_id = channel_id.to_string();
        self.tasks.spawn(async move {
            if let Err(error) = games.run(&game).await {
                error!(game = %game, error = %error, "failed to start game server");
                report_failure(chat.as_ref(), &channel_id, &format!("Could not start {game} server"))
                    .await;
            }
        });
        InteractionResponse::message(reply)
    }

    fn stop(&self, game: String, channel_id: &str) -> InteractionResponse {
        let is_running = self
            .games
            .running_game()
            .is_some_and(|running| running.eq_ignore_ascii_case(&game));
        if !is_running {
            return InteractionResponse::message(format!(
                "Cannot stop {game} server because it is not currently running"
            ));
        }

        let reply = format!("{game} server is shutting down");
        let games = self.games.clone();
        let chat = self.chat.clone();
        let channel_id = channel_id.to_string();
        self.tasks.spawn(async move {
            match games.stop().await {
                Ok(outcome) => info!(game = %game, outcome = ?outcome, "game server stopped"),
                Err(error) => {
                    error!(game = %game, error = %error, "failed to stop game server");
                    report_failure(
                        chat.as_ref(),
                        &channel_id,
                        &format!("Could not stop {game} server"),
                    )
                    .await;
                }
            }
        });
        InteractionResponse::message(reply)
    }
}

async fn report_failure(chat: &dyn ChatClient, channel_id: &str, content: &str) {
    if let Err(error) = chat.send_channel_message(channel_id, content).await {
        warn!(channel_id = %channel_id, error = %format!("{error:#}"), "failed to report command failure");
    }
}
