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
use aws_sdk_ec2::{Client as Ec2Client, error::DisplayErrorContext, types::InstanceStateName};
use tracing::info;

/// Observed lifecycle state of the compute resource hosting the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Unknown,
    Stopped,
    Pending,
    Running,
    Stopping,
    ShuttingDown,
    Terminated,
}

impl From<&InstanceStateName> for ResourceState {
    fn from(name: &InstanceStateName) -> Self {
        match name {
            InstanceStateName::Pending => Self::Pending,
            InstanceStateName::Running => Self::Running,
            InstanceStateName::Stopping => Self::Stopping,
            InstanceStateName::Stopped => Self::Stopped,
            InstanceStateName::ShuttingDown => Self::ShuttingDown,
            InstanceStateName::Terminated => Self::Terminated,
            _ => Self::Unknown,
        }
    }
}

#[async_trait]
pub trait ComputeResource: Send + Sync {
    async fn state(&self, instance_id: &str) -> anyhow::Result<ResourceState>;

    /// Starting an instance that is already starting is not an error.
    async fn start(&self, instance_id: &str) -> anyhow::Result<()>;

    async fn address(&self, instance_id: &str) -> anyhow::Result<String>;
}

#[derive(Clone)]
pub struct Ec2ComputeResource {
    client: Ec2Client,
}

impl Ec2ComputeResource {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Ec2Client::new(config),
        }
    }
}

#[async_trait]
impl ComputeResource for Ec2ComputeResource {
    async fn state(&self, instance_id: &str) -> anyhow::Result<ResourceState> {
        let output = self
            .client
            .describe_instance_status()
            .include_all_instances(true)
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|error| {
                anyhow::anyhow!(
                    "failed to describe instance status: {}",
                    DisplayErrorContext(&error)
                )
            })?;

        let statuses = output.instance_statuses();
        if statuses.len() != 1 {
            anyhow::bail!("invalid number of instances found: [{}]", statuses.len());
        }

        Ok(statuses[0]
            .instance_state()
            .and_then(|state| state.name())
            .map(ResourceState::from)
            .unwrap_or(ResourceState::Unknown))
    }

    async fn start(&self, instance_id: &str) -> anyhow::Result<()> {
        self.client
            .start_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|error| {
                anyhow::anyhow!("failed to start instance: {}", DisplayErrorContext(&error))
            })?;
        info!(instance_id = %instance_id, "instance start requested");
        Ok(())
    }

    async fn address(&self, instance_id: &str) -> anyhow::Result<String> {
        let output = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|error| {
                anyhow::anyhow!(
                    "failed to describe instance: {}",
                    DisplayErrorContext(&error)
                )
            })?;

        let instances: Vec<_> = output
            .reservations()
            .iter()
            .flat_map(|reservation| reservation.instances())
            .collect();
        if instances.len() != 1 {
            anyhow::bail!("invalid number of instances found: [{}]", instances.len());
        }

        instances[0]
            .public_dns_name()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("instance {instance_id} has no public DNS name"))
    }
}
