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

use gamehost_common::{DeferredJob, DeferredQueue};
use tracing::{debug, info, warn};

use crate::{discord::ChatClient, dispatch::CommandDispatcher};

pub const UNSUPPORTED_INTERACTION: &str = "Unsupported interaction";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Empty,
    Completed,
    ReceiveFailed,
    Unparseable,
    EditFailed,
}

/// Completes the request that woke this host up, before the listener opens.
pub struct BackendRequestHandler {
    queue: Arc<dyn DeferredQueue>,
    queue_url: String,
    dispatcher: Arc<CommandDispatcher>,
    chat: Arc<dyn ChatClient>,
}

impl BackendRequestHandler {
    pub fn new(
        queue: Arc<dyn DeferredQueue>,
        queue_url: impl Into<String>,
        dispatcher: Arc<CommandDispatcher>,
        chat: Arc<dyn ChatClient>,
    ) -> Self {
        Self {
            queue,
            queue_url: queue_url.into(),
            dispatcher,
            chat,
        }
    }

    /// Receives at most one deferred job, runs it through the dispatcher and
    /// edits the original reply with the result. Nothing here is fatal.
    pub async fn drain_once(&self) -> DrainOutcome {
        let job = match self.queue.receive(&self.queue_url).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!("no deferred request waiting");
                return DrainOutcome::Empty;
            }
            Err(error) => {
                warn!(error = %format!("{error:#}"), "failed to receive deferred request");
                return DrainOutcome::ReceiveFailed;
            }
        };

        let request = match DeferredJob::new(job.body).into_request() {
            Ok(request) => request,
            Err(error) => {
                warn!(error = %error, "discarding unparseable deferred request");
                self.acknowledge(&job.receipt).await;
                return DrainOutcome::Unparseable;
            }
        };
        info!(
            command = %request.command_name,
            game = ?request.game_argument,
            channel_id = %request.channel_id,
            "completing deferred request"
        );

        let content = match self.dispatcher.dispatch(&request).await {
            Ok(response) => response
                .content()
                .unwrap_or(UNSUPPORTED_INTERACTION)
                .to_string(),
            Err(error) => {
                warn!(error = %error, "deferred request is not a supported command");
                UNSUPPORTED_INTERACTION.to_string()
            }
        };

        let outcome = match self
            .chat
            .edit_original_response(&request.application_id, &request.token, &content)
            .await
        {
            Ok(()) => DrainOutcome::Completed,
            Err(error) => {
                warn!(
                    channel_id = %request.channel_id,
                    error = %format!("{error:#}"),
                    "failed to edit deferred response"
                );
                DrainOutcome::EditFailed
            }
        };
        self.acknowledge(&job.receipt).await;
        outcome
    }

    async fn acknowledge(&self, receipt: &str) {
        if let Err(error) = self.queue.acknowledge(&self.queue_url, receipt).await {
            warn!(error = %format!("{error:#}"), "failed to acknowledge deferred request");
        }
    }
}
