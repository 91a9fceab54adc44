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

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

pub const DEFAULT_API_BASE_URL: &str = "https://discord.com/api/v10";

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Replaces the content of a deferred interaction's placeholder reply.
    /// Repeating the same edit leaves the message unchanged.
    async fn edit_original_response(
        &self,
        application_id: &str,
        token: &str,
        content: &str,
    ) -> anyhow::Result<()>;

    async fn send_channel_message(&self, channel_id: &str, content: &str) -> anyhow::Result<()>;
}

#[derive(Serialize)]
struct MessageBody<'a> {
    content: &'a str,
}

pub struct DiscordRestClient {
    client: reqwest::Client,
    api_base_url: String,
    bot_token: String,
}

impl DiscordRestClient {
    pub fn new(api_base_url: &str, bot_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
        }
    }
}

#[async_trait]
impl ChatClient for DiscordRestClient {
    async fn edit_original_response(
        &self,
        application_id: &str,
        token: &str,
        content: &str,
    ) -> anyhow::Result<()> {
        let url = format!(
            "{}/webhooks/{}/{}/messages/@original",
            self.api_base_url, application_id, token
        );
        self.client
            .patch(&url)
            .json(&MessageBody { content })
            .send()
            .await
            .context("failed to edit original interaction response")?
            .error_for_status()
            .context("chat platform rejected interaction response edit")?;
        info!(application_id = %application_id, "edited original interaction response");
        Ok(())
    }

    async fn send_channel_message(&self, channel_id: &str, content: &str) -> anyhow::Result<()> {
        let url = format!("{}/channels/{}/messages", self.api_base_url, channel_id);
        self.client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.bot_token))
            .json(&MessageBody { content })
            .send()
            .await
            .context("failed to send channel message")?
            .error_for_status()
            .context("chat platform rejected channel message")?;
        info!(channel_id = %channel_id, "sent channel message");
        Ok(())
    }
}
