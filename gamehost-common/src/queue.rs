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

use async_trait::async_trait;
use aws_sdk_sqs::{Client as SqsClient, error::DisplayErrorContext};
use tracing::info;

/// Group key for the FIFO queue so redelivery keeps arrival order.
pub const MESSAGE_GROUP_ID: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub body: String,
    pub receipt: String,
}

#[async_trait]
pub trait DeferredQueue: Send + Sync {
    async fn send(&self, queue_url: &str, body: &str) -> anyhow::Result<()>;

    /// Non-blocking; `None` when the queue is empty.
    async fn receive(&self, queue_url: &str) -> anyhow::Result<Option<QueuedJob>>;

    async fn acknowledge(&self, queue_url: &str, receipt: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct SqsDeferredQueue {
    client: SqsClient,
}

impl SqsDeferredQueue {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: SqsClient::new(config),
        }
    }
}

#[async_trait]
impl DeferredQueue for SqsDeferredQueue {
    async fn send(&self, queue_url: &str, body: &str) -> anyhow::Result<()> {
        self.client
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .message_group_id(MESSAGE_GROUP_ID)
            .send()
            .await
            .map_err(|error| {
                anyhow::anyhow!(
                    "failed to send deferred request: {}",
                    DisplayErrorContext(&error)
                )
            })?;
        info!(queue_url = %queue_url, "deferred request queued");
        Ok(())
    }

    async fn receive(&self, queue_url: &str) -> anyhow::Result<Option<QueuedJob>> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(0)
            .send()
            .await
            .map_err(|error| {
                anyhow::anyhow!(
                    "failed to receive deferred request: {}",
                    DisplayErrorContext(&error)
                )
            })?;

        let Some(message) = output.messages().first() else {
            return Ok(None);
        };
        Ok(Some(QueuedJob {
            body: message.body().unwrap_or_default().to_string(),
            receipt: message.receipt_handle().unwrap_or_default().to_string(),
        }))
    }

    async fn acknowledge(&self, queue_url: &str, receipt: &str) -> anyhow::Result<()> {
        if receipt.is_empty() {
            return Ok(());
        }
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|error| {
                anyhow::anyhow!(
                    "failed to delete deferred request: {}",
                    DisplayErrorContext(&error)
                )
            })?;
        Ok(())
    }
}
