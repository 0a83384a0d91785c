// Staging intake: owns the staged-file status lifecycle and the idempotent
// mapping from parsed filenames to media files and catalog records.

use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::db;
use crate::models::{
    ContainerInfo, DirectoryDescriptor, FileDescriptor, FileKind, FileStatus, RecordKind,
    StagedFile,
};
use crate::normalize::Normalizer;
use crate::parser::{self, TagDictionaries};
use crate::settings::Settings;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("staged file {0} not found")]
    FileNotFound(i64),
    #[error("staged file {0} is not a video")]
    NotAVideo(i64),
    #[error("no title could be derived from '{0}'")]
    EmptyTitle(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Outcome of ingesting one file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct IngestSummary {
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub skipped: u32,
}

pub struct StagingIntake {
    pool: SqlitePool,
    settings: Arc<Settings>,
    dictionaries: TagDictionaries,
}

impl StagingIntake {
    pub fn new(pool: SqlitePool, settings: Arc<Settings>, dictionaries: TagDictionaries) -> Self {
        Self {
            pool,
            settings,
            dictionaries,
        }
    }

    async fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.settings.get_bool("normalize.transliterate", false).await)
    }

    /// Ingest one directory descriptor from the scanning collaborator.
    /// Per-file failures are logged and do not abort the directory.
    pub async fn ingest_directory(
        &self,
        dir: &DirectoryDescriptor,
    ) -> anyhow::Result<IngestSummary> {
        let mut summary = IngestSummary::default();

        let skip_folders = self
            .settings
            .get_list("intake.skip_folders", "watched,subtitle,sample,extras,trailers")
            .await;
        let folder_name = Path::new(&dir.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_lowercase();
        if skip_folders.iter().any(|s| s.eq_ignore_ascii_case(&folder_name)) {
            tracing::debug!("Skipping special folder: {}", dir.path);
            summary.skipped = dir.files.len() as u32;
            return Ok(summary);
        }

        for file in &dir.files {
            match self.ingest_file(file, &dir.path).await {
                Ok(IngestOutcome::Created) => summary.created += 1,
                Ok(IngestOutcome::Updated) => summary.updated += 1,
                Ok(IngestOutcome::Unchanged) => summary.unchanged += 1,
                Err(e) => {
                    tracing::warn!("Failed to ingest '{}' in {}: {}", file.name, dir.path, e);
                    summary.skipped += 1;
                }
            }
        }

        tracing::debug!(
            "Ingested {}: {} created, {} updated, {} unchanged, {} skipped",
            dir.path,
            summary.created,
            summary.updated,
            summary.unchanged,
            summary.skipped
        );

        Ok(summary)
    }

    /// Create-or-update one staged file. An unchanged observation leaves the
    /// row alone; a changed size or mtime flips the status to UPDATED unless
    /// the row is still NEW or DUPLICATE (those are never downgraded).
    pub async fn ingest_file(
        &self,
        file: &FileDescriptor,
        directory: &str,
    ) -> Result<IngestOutcome, IntakeError> {
        let existing: Option<(i64, i64, i64, FileStatus)> = sqlx::query_as(
            "SELECT id, size, modified_at, status FROM staged_files
             WHERE directory = ? AND file_name = ?",
        )
        .bind(directory)
        .bind(&file.name)
        .fetch_optional(&self.pool)
        .await?;

        let container_json = file
            .container
            .as_ref()
            .and_then(|c| serde_json::to_string(c).ok());

        match existing {
            None => {
                let kind = parser::classify_file(&file.name);
                let extension = parser::extension_of(&file.name).map(|e| e.to_lowercase());
                sqlx::query(
                    r#"INSERT INTO staged_files
                       (directory, file_name, extension, file_kind, size, modified_at,
                        container_info, nfo_text, status)
                       VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'NEW')"#,
                )
                .bind(directory)
                .bind(&file.name)
                .bind(extension)
                .bind(kind)
                .bind(file.size)
                .bind(file.modified_at)
                .bind(&container_json)
                .bind(&file.nfo_text)
                .execute(&self.pool)
                .await?;
                tracing::debug!(
                    "Staged new {} file '{}' in {}",
                    kind.as_str(),
                    file.name,
                    directory
                );
                Ok(IngestOutcome::Created)
            }
            Some((id, size, modified_at, status)) => {
                if size == file.size && modified_at == file.modified_at {
                    return Ok(IngestOutcome::Unchanged);
                }
                // A row that never finished processing keeps its status; an
                // incidental second observation must not downgrade it.
                let keep_status =
                    matches!(status, FileStatus::New | FileStatus::Duplicate);
                sqlx::query(
                    r#"UPDATE staged_files
                       SET size = ?, modified_at = ?, container_info = ?, nfo_text = ?,
                           status = CASE WHEN ? THEN status ELSE 'UPDATED' END,
                           updated_at = CURRENT_TIMESTAMP
                       WHERE id = ?"#,
                )
                .bind(file.size)
                .bind(file.modified_at)
                .bind(&container_json)
                .bind(&file.nfo_text)
                .bind(keep_status)
                .bind(id)
                .execute(&self.pool)
                .await?;
                Ok(IngestOutcome::Updated)
            }
        }
    }

    /// Atomically claim the oldest pending video file, flipping it to the
    /// PROCESS status in the same statement so concurrent claimers can never
    /// receive the same row. Returns None when nothing is claimable.
    pub async fn claim_next_video(&self) -> Result<Option<i64>, IntakeError> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"UPDATE staged_files
               SET status = 'PROCESS', updated_at = CURRENT_TIMESTAMP
               WHERE id = (
                   SELECT id FROM staged_files
                   WHERE file_kind = 'video' AND status IN ('NEW', 'UPDATED')
                   ORDER BY created_at ASC, id ASC
                   LIMIT 1
               )
               AND status IN ('NEW', 'UPDATED')
               RETURNING id"#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    /// Resolve one claimed staged file into media file + catalog record(s).
    ///
    /// A file without a media-file link gets the full identity resolution
    /// path; a previously linked file only re-marks its records UPDATED. On
    /// success the staged file ends DONE (or DUPLICATE); the caller is
    /// responsible for flipping it to ERROR when this returns Err.
    pub async fn process_video(&self, id: i64) -> Result<(), IntakeError> {
        let file: StagedFile = sqlx::query_as("SELECT * FROM staged_files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(IntakeError::FileNotFound(id))?;

        if file.file_kind != FileKind::Video {
            return Err(IntakeError::NotAVideo(id));
        }

        if let Some(media_file_id) = file.media_file_id {
            self.relink_existing(&file, media_file_id).await?;
            return Ok(());
        }

        let parsed = parser::parse_video_name(&file.file_name, &self.dictionaries);
        if parsed.title.is_empty() {
            return Err(IntakeError::EmptyTitle(file.file_name.clone()));
        }

        let normalizer = self.normalizer().await;
        let container: ContainerInfo = file
            .container_info
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default();

        let media_identifier = media_file_identifier(&normalizer, &parsed);
        // Punctuation-only titles normalize to nothing; an empty identifier
        // would collide every such file onto one media file.
        if media_identifier.is_empty() {
            return Err(IntakeError::EmptyTitle(file.file_name.clone()));
        }
        let media_file_id = self
            .create_or_get_media_file(&media_identifier, &parsed, &container)
            .await?;

        // A second staged file resolving to an already-backed part slot is a
        // duplicate, not a new part.
        if self.is_duplicate_part(media_file_id, parsed.part, file.id).await? {
            tracing::info!(
                "Staged file {} ({}) duplicates media file {} part {:?}",
                file.id,
                file.full_path().display(),
                media_file_id,
                parsed.part
            );
            sqlx::query(
                r#"UPDATE staged_files
                   SET media_file_id = ?, part = ?, status = 'DUPLICATE',
                       updated_at = CURRENT_TIMESTAMP
                   WHERE id = ?"#,
            )
            .bind(media_file_id)
            .bind(parsed.part)
            .bind(file.id)
            .execute(&self.pool)
            .await?;
            return Ok(());
        }

        let record_ids = match parsed.kind {
            RecordKind::Movie => {
                let identifier = normalizer.movie_identifier(&parsed.title, parsed.year);
                vec![
                    self.create_or_get_record(
                        &identifier,
                        RecordKind::Movie,
                        &parsed.title,
                        parsed.year,
                        None,
                        None,
                        None,
                    )
                    .await?,
                ]
            }
            RecordKind::Episode => {
                let season_number = parsed.season.unwrap_or(1);
                let series_id = self
                    .create_or_get_series(&normalizer, &parsed.title, parsed.year)
                    .await?;
                let season_id = self.create_or_get_season(series_id, season_number).await?;

                let mut ids = Vec::with_capacity(parsed.episodes.len());
                for episode in &parsed.episodes {
                    let identifier = normalizer.episode_identifier(
                        &parsed.title,
                        parsed.year,
                        season_number,
                        *episode,
                    );
                    ids.push(
                        self.create_or_get_record(
                            &identifier,
                            RecordKind::Episode,
                            &parsed.title,
                            parsed.year,
                            Some(season_number),
                            Some(*episode),
                            Some(season_id),
                        )
                        .await?,
                    );
                }
                ids
            }
        };

        for record_id in &record_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO media_file_records (media_file_id, record_id) VALUES (?, ?)",
            )
            .bind(media_file_id)
            .bind(record_id)
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(
            r#"UPDATE staged_files
               SET media_file_id = ?, part = ?, status = 'DONE', updated_at = CURRENT_TIMESTAMP
               WHERE id = ?"#,
        )
        .bind(media_file_id)
        .bind(parsed.part)
        .bind(file.id)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Processed staged file {} -> media file {} ({} record(s))",
            file.id,
            media_file_id,
            record_ids.len()
        );

        Ok(())
    }

    /// Lighter path for files that already carry a media-file link: the
    /// records are marked UPDATED for a metadata refresh and the file is done.
    async fn relink_existing(&self, file: &StagedFile, media_file_id: i64) -> Result<(), IntakeError> {
        let refreshed = sqlx::query(
            r#"UPDATE catalog_records
               SET status = 'UPDATED', updated_at = CURRENT_TIMESTAMP
               WHERE id IN (SELECT record_id FROM media_file_records WHERE media_file_id = ?)"#,
        )
        .bind(media_file_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        sqlx::query(
            "UPDATE staged_files SET status = 'DONE', updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(file.id)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Re-linked staged file {}: {} record(s) marked UPDATED",
            file.id,
            refreshed
        );

        Ok(())
    }

    async fn is_duplicate_part(
        &self,
        media_file_id: i64,
        part: Option<i32>,
        file_id: i64,
    ) -> Result<bool, IntakeError> {
        let existing: Option<i64> = sqlx::query_scalar(
            r#"SELECT id FROM staged_files
               WHERE media_file_id = ? AND part IS ? AND id != ?
                 AND status NOT IN ('DELETED', 'DUPLICATE')
               LIMIT 1"#,
        )
        .bind(media_file_id)
        .bind(part)
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(existing.is_some())
    }

    async fn create_or_get_media_file(
        &self,
        identifier: &str,
        parsed: &parser::ParsedVideo,
        container: &ContainerInfo,
    ) -> Result<i64, IntakeError> {
        sqlx::query(
            r#"INSERT INTO media_files
               (identifier, container, resolution, source_tag, video_codec, duration_secs)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(identifier) DO NOTHING"#,
        )
        .bind(identifier)
        .bind(&parsed.container)
        .bind(&parsed.resolution)
        .bind(&parsed.source_tag)
        .bind(
            container
                .video_codec
                .as_ref()
                .or(parsed.video_codec.as_ref()),
        )
        .bind(container.duration_secs)
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM media_files WHERE identifier = ?")
            .bind(identifier)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// Records are created once per identifier and never recreated; the
    /// conflict path deliberately leaves an existing row (and its status)
    /// untouched so re-scans are idempotent.
    #[allow(clippy::too_many_arguments)]
    async fn create_or_get_record(
        &self,
        identifier: &str,
        kind: RecordKind,
        title: &str,
        year: Option<i32>,
        season_number: Option<i32>,
        episode_number: Option<i32>,
        season_id: Option<i64>,
    ) -> Result<i64, IntakeError> {
        sqlx::query(
            r#"INSERT INTO catalog_records
               (identifier, kind, title, year, season_number, episode_number, season_id, status)
               VALUES (?, ?, ?, ?, ?, ?, ?, 'NEW')
               ON CONFLICT(identifier) DO NOTHING"#,
        )
        .bind(identifier)
        .bind(kind)
        .bind(title)
        .bind(year)
        .bind(season_number)
        .bind(episode_number)
        .bind(season_id)
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM catalog_records WHERE identifier = ?")
            .bind(identifier)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn create_or_get_series(
        &self,
        normalizer: &Normalizer,
        title: &str,
        year: Option<i32>,
    ) -> Result<i64, IntakeError> {
        let identifier = normalizer.series_identifier(title, year);
        sqlx::query(
            r#"INSERT INTO series (identifier, title, year) VALUES (?, ?, ?)
               ON CONFLICT(identifier) DO NOTHING"#,
        )
        .bind(&identifier)
        .bind(title)
        .bind(year)
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM series WHERE identifier = ?")
            .bind(&identifier)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn create_or_get_season(
        &self,
        series_id: i64,
        season_number: i32,
    ) -> Result<i64, IntakeError> {
        sqlx::query(
            r#"INSERT INTO seasons (series_id, season_number) VALUES (?, ?)
               ON CONFLICT(series_id, season_number) DO NOTHING"#,
        )
        .bind(series_id)
        .bind(season_number)
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar(
            "SELECT id FROM seasons WHERE series_id = ? AND season_number = ?",
        )
        .bind(series_id)
        .bind(season_number)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Mark staged files whose backing path no longer exists as DELETED,
    /// batching the bulk updates. Returns the number of rows marked.
    pub async fn sweep_deleted(&self) -> anyhow::Result<u64> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT id, directory, file_name FROM staged_files WHERE status != 'DELETED'",
        )
        .fetch_all(&self.pool)
        .await?;

        let missing: Vec<i64> = stream::iter(rows)
            .map(|(id, directory, file_name)| async move {
                let path = Path::new(&directory).join(&file_name);
                match tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    true => None,
                    false => Some(id),
                }
            })
            .buffer_unordered(16)
            .filter_map(|id| async move { id })
            .collect()
            .await;

        if missing.is_empty() {
            return Ok(0);
        }

        let marked = db::set_file_statuses(&self.pool, &missing, FileStatus::Deleted).await?;
        tracing::info!("Deletion sweep marked {} staged file(s) DELETED", marked);
        Ok(marked)
    }

    pub async fn mark_file_error(&self, id: i64) {
        if let Err(e) = sqlx::query(
            "UPDATE staged_files SET status = 'ERROR', updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        {
            tracing::error!("Failed to mark staged file {} ERROR: {}", id, e);
        }
    }

    /// Administrative reset: make a staged file eligible for the next poll.
    pub async fn rescan_file(&self, id: i64) -> anyhow::Result<bool> {
        let changed = sqlx::query(
            "UPDATE staged_files SET status = 'UPDATED', updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(changed > 0)
    }

    /// Administrative reset: make a catalog record eligible for the next
    /// metadata poll, clearing its attempt counter.
    pub async fn rescan_record(&self, id: i64) -> anyhow::Result<bool> {
        let changed = sqlx::query(
            r#"UPDATE catalog_records
               SET status = 'UPDATED', scan_attempts = 0, updated_at = CURRENT_TIMESTAMP
               WHERE id = ?"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(changed > 0)
    }
}

/// Identifier of the physical container: title/year plus the episode span,
/// but never the part number — cd1/cd2 belong to one media file.
fn media_file_identifier(normalizer: &Normalizer, parsed: &parser::ParsedVideo) -> String {
    match parsed.kind {
        RecordKind::Movie => normalizer.movie_identifier(&parsed.title, parsed.year),
        RecordKind::Episode => {
            let mut id = normalizer.series_identifier(&parsed.title, parsed.year);
            id.push_str(&format!("S{:02}", parsed.season.unwrap_or(1)));
            for episode in &parsed.episodes {
                id.push_str(&format!("E{:02}", episode));
            }
            id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::test_pool;
    use crate::models::RecordStatus;
    use std::collections::HashSet;

    async fn test_intake() -> StagingIntake {
        let pool = test_pool().await;
        let settings = Arc::new(Settings::new(pool.clone()));
        settings.seed_defaults().await.expect("seed settings");
        StagingIntake::new(pool, settings, TagDictionaries::default())
    }

    fn descriptor(name: &str, size: i64, modified_at: i64) -> FileDescriptor {
        FileDescriptor {
            name: name.to_string(),
            size,
            modified_at,
            container: None,
            nfo_text: None,
        }
    }

    async fn file_status(intake: &StagingIntake, id: i64) -> FileStatus {
        sqlx::query_scalar("SELECT status FROM staged_files WHERE id = ?")
            .bind(id)
            .fetch_one(&intake.pool)
            .await
            .expect("status")
    }

    async fn record_count(intake: &StagingIntake) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM catalog_records")
            .fetch_one(&intake.pool)
            .await
            .expect("count")
    }

    #[tokio::test]
    async fn test_ingest_create_update_unchanged() {
        let intake = test_intake().await;
        let dir = "/media/movies";

        let outcome = intake
            .ingest_file(&descriptor("Avatar (2009).mkv", 100, 1000), dir)
            .await
            .expect("ingest");
        assert_eq!(outcome, IngestOutcome::Created);

        // Same size and mtime: untouched.
        let outcome = intake
            .ingest_file(&descriptor("Avatar (2009).mkv", 100, 1000), dir)
            .await
            .expect("ingest");
        assert_eq!(outcome, IngestOutcome::Unchanged);

        // NEW rows keep their status even when the file changed.
        let outcome = intake
            .ingest_file(&descriptor("Avatar (2009).mkv", 200, 2000), dir)
            .await
            .expect("ingest");
        assert_eq!(outcome, IngestOutcome::Updated);
        let id: i64 = sqlx::query_scalar("SELECT id FROM staged_files")
            .fetch_one(&intake.pool)
            .await
            .expect("id");
        assert_eq!(file_status(&intake, id).await, FileStatus::New);
    }

    #[tokio::test]
    async fn test_processed_file_flips_to_updated_on_change() {
        let intake = test_intake().await;
        let dir = "/media/movies";

        intake
            .ingest_file(&descriptor("Avatar (2009).mkv", 100, 1000), dir)
            .await
            .expect("ingest");
        let id = intake.claim_next_video().await.expect("claim").expect("one file");
        intake.process_video(id).await.expect("process");
        assert_eq!(file_status(&intake, id).await, FileStatus::Done);

        intake
            .ingest_file(&descriptor("Avatar (2009).mkv", 300, 3000), dir)
            .await
            .expect("ingest");
        assert_eq!(file_status(&intake, id).await, FileStatus::Updated);
    }

    #[tokio::test]
    async fn test_stable_identity_across_rescans() {
        let intake = test_intake().await;
        let dir = "/media/movies";

        intake
            .ingest_file(&descriptor("Avatar (2009) 1080p.mkv", 100, 1000), dir)
            .await
            .expect("ingest");
        let id = intake.claim_next_video().await.expect("claim").expect("file");
        intake.process_video(id).await.expect("process");

        assert_eq!(record_count(&intake).await, 1);
        let (identifier, status): (String, RecordStatus) =
            sqlx::query_as("SELECT identifier, status FROM catalog_records")
                .fetch_one(&intake.pool)
                .await
                .expect("record");
        assert_eq!(identifier, "Avatar2009");
        assert_eq!(status, RecordStatus::New);

        // Re-ingest unchanged: nothing becomes claimable, no second record,
        // record status untouched.
        let outcome = intake
            .ingest_file(&descriptor("Avatar (2009) 1080p.mkv", 100, 1000), dir)
            .await
            .expect("ingest");
        assert_eq!(outcome, IngestOutcome::Unchanged);
        assert!(intake.claim_next_video().await.expect("claim").is_none());
        assert_eq!(record_count(&intake).await, 1);
    }

    #[tokio::test]
    async fn test_relink_marks_records_updated() {
        let intake = test_intake().await;
        let dir = "/media/movies";

        intake
            .ingest_file(&descriptor("Avatar (2009).mkv", 100, 1000), dir)
            .await
            .expect("ingest");
        let id = intake.claim_next_video().await.expect("claim").expect("file");
        intake.process_video(id).await.expect("process");

        // Pretend the record already completed a scan cycle.
        sqlx::query("UPDATE catalog_records SET status = 'DONE'")
            .execute(&intake.pool)
            .await
            .expect("set done");

        intake
            .ingest_file(&descriptor("Avatar (2009).mkv", 200, 2000), dir)
            .await
            .expect("ingest");
        let id = intake.claim_next_video().await.expect("claim").expect("file");
        intake.process_video(id).await.expect("process");

        let status: RecordStatus = sqlx::query_scalar("SELECT status FROM catalog_records")
            .fetch_one(&intake.pool)
            .await
            .expect("status");
        assert_eq!(status, RecordStatus::Updated);
    }

    #[tokio::test]
    async fn test_episode_creates_series_season_record() {
        let intake = test_intake().await;

        intake
            .ingest_file(&descriptor("Show.Name.S02E05.mkv", 100, 1000), "/media/tv")
            .await
            .expect("ingest");
        let id = intake.claim_next_video().await.expect("claim").expect("file");
        intake.process_video(id).await.expect("process");

        let (identifier, season, episode): (String, i64, i64) = sqlx::query_as(
            "SELECT identifier, season_number, episode_number FROM catalog_records",
        )
        .fetch_one(&intake.pool)
        .await
        .expect("record");
        assert_eq!(identifier, "ShowNameS02E05");
        assert_eq!(season, 2);
        assert_eq!(episode, 5);

        let series_identifier: String = sqlx::query_scalar("SELECT identifier FROM series")
            .fetch_one(&intake.pool)
            .await
            .expect("series");
        assert_eq!(series_identifier, "ShowName");
    }

    #[tokio::test]
    async fn test_multi_episode_file_creates_one_record_per_episode() {
        let intake = test_intake().await;

        intake
            .ingest_file(
                &descriptor("Show Name S01E01E02.mkv", 100, 1000),
                "/media/tv",
            )
            .await
            .expect("ingest");
        let id = intake.claim_next_video().await.expect("claim").expect("file");
        intake.process_video(id).await.expect("process");

        assert_eq!(record_count(&intake).await, 2);

        let media_files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_files")
            .fetch_one(&intake.pool)
            .await
            .expect("count");
        assert_eq!(media_files, 1);

        let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_file_records")
            .fetch_one(&intake.pool)
            .await
            .expect("count");
        assert_eq!(links, 2);
    }

    #[tokio::test]
    async fn test_duplicate_file_marked_duplicate() {
        let intake = test_intake().await;

        intake
            .ingest_file(&descriptor("Avatar (2009).mkv", 100, 1000), "/media/a")
            .await
            .expect("ingest");
        intake
            .ingest_file(&descriptor("Avatar (2009).mkv", 120, 1200), "/media/b")
            .await
            .expect("ingest");

        let first = intake.claim_next_video().await.expect("claim").expect("file");
        intake.process_video(first).await.expect("process");
        let second = intake.claim_next_video().await.expect("claim").expect("file");
        intake.process_video(second).await.expect("process");

        assert_eq!(file_status(&intake, first).await, FileStatus::Done);
        assert_eq!(file_status(&intake, second).await, FileStatus::Duplicate);
        assert_eq!(record_count(&intake).await, 1);
    }

    #[tokio::test]
    async fn test_multi_part_files_share_media_file() {
        let intake = test_intake().await;

        intake
            .ingest_file(&descriptor("Long Movie (1968) cd1.mkv", 100, 1000), "/media")
            .await
            .expect("ingest");
        intake
            .ingest_file(&descriptor("Long Movie (1968) cd2.mkv", 100, 1000), "/media")
            .await
            .expect("ingest");

        while let Some(id) = intake.claim_next_video().await.expect("claim") {
            intake.process_video(id).await.expect("process");
        }

        let media_files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_files")
            .fetch_one(&intake.pool)
            .await
            .expect("count");
        assert_eq!(media_files, 1);

        let parts: Vec<(i64,)> = sqlx::query_as(
            "SELECT part FROM staged_files WHERE status = 'DONE' ORDER BY part",
        )
        .fetch_all(&intake.pool)
        .await
        .expect("parts");
        assert_eq!(parts, vec![(1,), (2,)]);
        assert_eq!(record_count(&intake).await, 1);
    }

    #[tokio::test]
    async fn test_claim_exclusivity_under_racing_claimers() {
        let intake = Arc::new(test_intake().await);

        for i in 0..20 {
            intake
                .ingest_file(
                    &descriptor(&format!("Movie {} (200{}).mkv", i, i % 10), 100, 1000),
                    "/media",
                )
                .await
                .expect("ingest");
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let intake = intake.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(id) = intake.claim_next_video().await.expect("claim") {
                    claimed.push(id);
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.expect("join"));
        }

        // Every row claimed exactly once, and nothing is left poll-eligible.
        let unique: HashSet<i64> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
        assert_eq!(unique.len(), 20);
        assert!(intake.claim_next_video().await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn test_error_files_excluded_until_reset() {
        let intake = test_intake().await;

        intake
            .ingest_file(&descriptor("Broken (2000).mkv", 100, 1000), "/media")
            .await
            .expect("ingest");
        let id = intake.claim_next_video().await.expect("claim").expect("file");
        intake.mark_file_error(id).await;

        assert!(intake.claim_next_video().await.expect("claim").is_none());

        assert!(intake.rescan_file(id).await.expect("reset"));
        assert_eq!(intake.claim_next_video().await.expect("claim"), Some(id));
    }

    #[tokio::test]
    async fn test_sweep_marks_missing_paths_deleted() {
        let intake = test_intake().await;

        // A path that really exists on disk survives the sweep.
        let dir = std::env::temp_dir().join(format!("mediarr-sweep-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let kept = dir.join("Kept (2001).mkv");
        std::fs::write(&kept, b"x").expect("write");

        intake
            .ingest_file(
                &descriptor("Kept (2001).mkv", 1, 1),
                dir.to_str().expect("utf8 path"),
            )
            .await
            .expect("ingest");
        intake
            .ingest_file(&descriptor("Gone (2002).mkv", 1, 1), "/nonexistent/path")
            .await
            .expect("ingest");

        let marked = intake.sweep_deleted().await.expect("sweep");
        assert_eq!(marked, 1);

        let deleted: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM staged_files WHERE status = 'DELETED'")
                .fetch_one(&intake.pool)
                .await
                .expect("count");
        assert_eq!(deleted, 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_skip_folder_is_not_ingested() {
        let intake = test_intake().await;
        let dir = DirectoryDescriptor {
            path: "/media/tv/watched".to_string(),
            modified_at: 0,
            files: vec![descriptor("Show.S01E01.mkv", 1, 1)],
        };
        let summary = intake.ingest_directory(&dir).await.expect("ingest");
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.created, 0);
    }
}
