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
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_s3::{Client as S3Client, error::DisplayErrorContext, primitives::ByteStream};
use chrono::{DateTime, NaiveDate, Utc};
use gamehost_common::{GameCatalog, GameProfile};
use tracing::{debug, info};
use walkdir::WalkDir;

const DATE_FOLDER_FORMAT: &str = "%Y-%m-%d";

#[async_trait]
pub trait SaveBackup: Send + Sync {
    async fn backup(&self) -> anyhow::Result<()>;
}

/// Used when no save bucket is configured.
pub struct DisabledBackup;

#[async_trait]
impl SaveBackup for DisabledBackup {
    async fn backup(&self) -> anyhow::Result<()> {
        debug!("save backup disabled");
        Ok(())
    }
}

/// Where backed-up save files land.
#[async_trait]
pub trait SaveStore: Send + Sync {
    async fn list_keys(&self) -> anyhow::Result<Vec<String>>;

    async fn put_file(&self, key: &str, path: &Path) -> anyhow::Result<()>;
}

pub struct S3SaveStore {
    client: S3Client,
    bucket: String,
}

impl S3SaveStore {
    pub fn new(config: &aws_config::SdkConfig, bucket: impl Into<String>) -> Self {
        Self {
            client: S3Client::new(config),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl SaveStore for S3SaveStore {
    async fn list_keys(&self) -> anyhow::Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|error| {
                    anyhow::anyhow!(
                        "failed to list save bucket {}: {}",
                        self.bucket,
                        DisplayErrorContext(&error)
                    )
                })?;
            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
            match output.next_continuation_token() {
                Some(next) => continuation = Some(next.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    async fn put_file(&self, key: &str, path: &Path) -> anyhow::Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("failed to read save file {}", path.display()))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|error| {
                anyhow::anyhow!("failed to upload {key}: {}", DisplayErrorContext(&error))
            })?;
        Ok(())
    }
}

/// Copies each game's save files into `<game>/<YYYY-MM-DD>/<relative path>`
/// when they changed since the last dated backup.
pub struct GameSaveBackup {
    store: Arc<dyn SaveStore>,
    catalog: Arc<GameCatalog>,
    frequency: Duration,
}

impl GameSaveBackup {
    pub fn new(store: Arc<dyn SaveStore>, catalog: Arc<GameCatalog>, frequency: Duration) -> Self {
        Self {
            store,
            catalog,
            frequency,
        }
    }

    async fn backup_game(
        &self,
        profile: &GameProfile,
        last_backup: Option<NaiveDate>,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let scan = profile.clone();
        let (files, last_modified) = tokio::task::spawn_blocking(move || collect_save_files(&scan))
            .await
            .context("save file scan panicked")?
            .with_context(|| format!("could not get {} save files", profile.name))?;

        if !needs_backup(last_modified, last_backup, self.frequency) {
            info!(game = %profile.name, "no backup required");
            return Ok(());
        }
        info!(
            game = %profile.name,
            previous = ?last_backup,
            files = files.len(),
            "backing up save files"
        );

        let mut failures = Vec::new();
        for file in &files {
            let key = format!(
                "{}/{}/{}",
                profile.name,
                today.format(DATE_FOLDER_FORMAT),
                file.relative
            );
            if let Err(error) = self.store.put_file(&key, &file.path).await {
                failures.push(format!("{error:#}"));
            }
        }
        if !failures.is_empty() {
            anyhow::bail!("{}", failures.join("; "));
        }
        Ok(())
    }
}

#[async_trait]
impl SaveBackup for GameSaveBackup {
    async fn backup(&self) -> anyhow::Result<()> {
        let keys = self.store.list_keys().await?;
        let last_backups = latest_backup_dates(&keys, &self.catalog);
        let today = Utc::now().date_naive();

        let mut failures = Vec::new();
        for profile in self.catalog.profiles() {
            let last_backup = last_backups.get(&profile.name).copied();
            if let Err(error) = self.backup_game(profile, last_backup, today).await {
                failures.push(format!("{}: {error:#}", profile.name));
            }
        }
        if !failures.is_empty() {
            anyhow::bail!("save backup failed for {}", failures.join(", "));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveFile {
    pub path: PathBuf,
    /// Relative to the game's working directory, `/`-separated.
    pub relative: String,
}

/// Most recent `<game>/<date>/` folder per configured game.
pub fn latest_backup_dates(keys: &[String], catalog: &GameCatalog) -> HashMap<String, NaiveDate> {
    let mut latest: HashMap<String, NaiveDate> = HashMap::new();
    for key in keys {
        let mut parts = key.split('/');
        let (Some(game), Some(folder)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Some(profile) = catalog.get(game) else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(folder, DATE_FOLDER_FORMAT) else {
            continue;
        };
        latest
            .entry(profile.name.clone())
            .and_modify(|current| *current = (*current).max(date))
            .or_insert(date);
    }
    latest
}

/// Every file under the profile's save paths, sorted, plus the newest
/// modification time among them. Symlinks are not followed.
pub fn collect_save_files(
    profile: &GameProfile,
) -> std::io::Result<(Vec<SaveFile>, Option<SystemTime>)> {
    let root = Path::new(&profile.working_dir);
    let mut files = Vec::new();
    let mut last_modified: Option<SystemTime> = None;

    for save in &profile.save_files {
        for entry in WalkDir::new(root.join(save)) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let modified = entry.metadata()?.modified()?;
            last_modified = Some(last_modified.map_or(modified, |latest| latest.max(modified)));
            let path = entry.into_path();
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|component| component.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            files.push(SaveFile { path, relative });
        }
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok((files, last_modified))
}

pub fn needs_backup(
    last_modified: Option<SystemTime>,
    last_backup: Option<NaiveDate>,
    frequency: Duration,
) -> bool {
    let Some(last_modified) = last_modified else {
        return false;
    };
    let Some(last_backup) = last_backup else {
        return true;
    };
    let backed_up_at = last_backup.and_time(chrono::NaiveTime::MIN).and_utc();
    let Ok(frequency) = chrono::Duration::from_std(frequency) else {
        return false;
    };
    let Some(due_at) = backed_up_at.checked_add_signed(frequency) else {
        return false;
    };
    DateTime::<Utc>::from(last_modified) >= due_at
}
