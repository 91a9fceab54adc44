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

use serde::{Deserialize, Serialize};

pub const SIGNATURE_HEADER: &str = "x-signature-ed25519";
pub const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

/// Path the host service listens on for forwarded interactions.
pub const BACKEND_ENDPOINT: &str = "/discord";

pub const START_COMMAND: &str = "start";
pub const STOP_COMMAND: &str = "stop";
pub const GAME_OPTION: &str = "game";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "u8", into = "u8")]
pub enum InteractionType {
    Ping,
    Command,
    Other(u8),
}

impl From<u8> for InteractionType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Ping,
            2 => Self::Command,
            other => Self::Other(other),
        }
    }
}

impl From<InteractionType> for u8 {
    fn from(value: InteractionType) -> Self {
        match value {
            InteractionType::Ping => 1,
            InteractionType::Command => 2,
            InteractionType::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "u8", into = "u8")]
pub enum ResponseType {
    Pong,
    ChannelMessage,
    DeferredChannelMessage,
    Other(u8),
}

impl From<u8> for ResponseType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Pong,
            4 => Self::ChannelMessage,
            5 => Self::DeferredChannelMessage,
            other => Self::Other(other),
        }
    }
}

impl From<ResponseType> for u8 {
    fn from(value: ResponseType) -> Self {
        match value {
            ResponseType::Pong => 1,
            ResponseType::ChannelMessage => 4,
            ResponseType::DeferredChannelMessage => 5,
            ResponseType::Other(other) => other,
        }
    }
}

/// The subset of the chat platform's interaction payload this system reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: InteractionType,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub application_id: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<CommandData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandData {
    pub name: String,
    #[serde(default)]
    pub options: Vec<CommandOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOption {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// One parsed inbound interaction. The raw body is kept verbatim so it can be
/// replayed to the backend or parked on the deferred queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionRequest {
    pub kind: InteractionType,
    pub command_name: String,
    pub game_argument: Option<String>,
    pub channel_id: String,
    pub application_id: String,
    pub token: String,
    pub raw_body: String,
    pub timestamp: String,
    pub signature: String,
}

impl InteractionRequest {
    pub fn parse(raw_body: &str, timestamp: &str, signature: &str) -> serde_json::Result<Self> {
        let interaction: Interaction = serde_json::from_str(raw_body)?;
        let (command_name, game_argument) = match interaction.data.as_ref() {
            Some(data) => (data.name.clone(), game_argument(data)),
            None => (String::new(), None),
        };

        Ok(Self {
            kind: interaction.kind,
            command_name,
            game_argument,
            channel_id: interaction.channel_id,
            application_id: interaction.application_id,
            token: interaction.token,
            raw_body: raw_body.to_string(),
            timestamp: timestamp.to_string(),
            signature: signature.to_string(),
        })
    }

    pub fn is_ping(&self) -> bool {
        self.kind == InteractionType::Ping
    }
}

fn game_argument(data: &CommandData) -> Option<String> {
    data.options
        .iter()
        .find(|option| option.name == GAME_OPTION)
        .and_then(|option| option.value.as_str())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// A request parked on the deferred queue while the compute resource boots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredJob {
    pub raw_body: String,
}

impl DeferredJob {
    pub fn new(raw_body: impl Into<String>) -> Self {
        Self {
            raw_body: raw_body.into(),
        }
    }

    /// Signature headers are not carried through the queue; the job was
    /// verified by the gateway before it was enqueued.
    pub fn into_request(self) -> serde_json::Result<InteractionRequest> {
        InteractionRequest::parse(&self.raw_body, "", "")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    pub kind: ResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseData {
    pub content: String,
}

impl InteractionResponse {
    pub fn pong() -> Self {
        Self {
            kind: ResponseType::Pong,
            data: None,
        }
    }

    pub fn deferred() -> Self {
        Self {
            kind: ResponseType::DeferredChannelMessage,
            data: None,
        }
    }

    pub fn message(content: impl Into<String>) -> Self {
        Self {
            kind: ResponseType::ChannelMessage,
            data: Some(ResponseData {
                content: content.into(),
            }),
        }
    }

    pub fn content(&self) -> Option<&str> {
        self.data.as_ref().map(|data| data.content.as_str())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
