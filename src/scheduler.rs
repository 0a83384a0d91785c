// Periodic scan scheduling: a sequential file-intake drain and a bounded
// worker pool for metadata scans. The two loops run as separate tasks and
// share state only through the persisted status columns.

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::intake::StagingIntake;
use crate::services::registry::ScannerRegistry;
use crate::settings::Settings;

pub struct ScanScheduler {
    pool: SqlitePool,
    settings: Arc<Settings>,
    intake: Arc<StagingIntake>,
    registry: Arc<ScannerRegistry>,
}

impl ScanScheduler {
    pub fn new(
        pool: SqlitePool,
        settings: Arc<Settings>,
        intake: Arc<StagingIntake>,
        registry: Arc<ScannerRegistry>,
    ) -> Self {
        Self {
            pool,
            settings,
            intake,
            registry,
        }
    }

    /// One file-intake tick: claim-one, process, repeat until the queue is
    /// drained. Strictly sequential; a failed file is marked ERROR and the
    /// drain continues.
    pub async fn run_intake_tick(&self) -> Result<u32> {
        let mut processed = 0u32;
        while let Some(id) = self.intake.claim_next_video().await? {
            if let Err(e) = self.intake.process_video(id).await {
                tracing::warn!("Processing staged file {} failed: {}", id, e);
                self.intake.mark_file_error(id).await;
            }
            processed += 1;
        }
        Ok(processed)
    }

    /// One metadata tick: collect pending record ids, push them onto a shared
    /// queue and drain it with a fixed-size worker pool. Blocks until every
    /// worker finished, so ticks never overlap.
    pub async fn run_metadata_tick(&self) -> Result<u32> {
        let ids = self.pending_record_ids().await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let workers = self.settings.get_int("scheduler.workers", 5).await.max(1) as usize;
        tracing::debug!(
            "Metadata tick: {} record(s) pending, {} worker(s)",
            ids.len(),
            workers
        );

        // Single producer fills the queue once per tick; each id appears at
        // most once, so no record has two concurrent writers.
        let queue = Arc::new(Mutex::new(VecDeque::from(ids)));

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let registry = Arc::clone(&self.registry);
            let pool = self.pool.clone();
            handles.push(tokio::spawn(async move {
                let mut scanned = 0u32;
                loop {
                    let next = queue.lock().ok().and_then(|mut q| q.pop_front());
                    let Some(record_id) = next else {
                        break;
                    };
                    match registry.scan_record(&pool, record_id).await {
                        Ok(status) => {
                            tracing::debug!(
                                "Worker {}: record {} -> {}",
                                worker,
                                record_id,
                                status.as_str()
                            );
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Worker {}: scan of record {} failed: {}",
                                worker,
                                record_id,
                                e
                            );
                            mark_record_error(&pool, record_id).await;
                        }
                    }
                    scanned += 1;
                }
                scanned
            }));
        }

        let mut total = 0u32;
        for handle in handles {
            match handle.await {
                Ok(scanned) => total += scanned,
                Err(e) => tracing::error!("Metadata scan worker panicked: {}", e),
            }
        }
        Ok(total)
    }

    /// Pending work is NEW/UPDATED; ERROR records join only when bounded
    /// retry is switched on and their attempt count is under the limit.
    async fn pending_record_ids(&self) -> Result<Vec<i64>> {
        let retry_errors = self.settings.get_bool("scanner.retry_errors", false).await;
        let ids: Vec<i64> = if retry_errors {
            let retry_limit = self.settings.get_int("scanner.retry_limit", 3).await;
            sqlx::query_scalar(
                r#"SELECT id FROM catalog_records
                   WHERE status IN ('NEW', 'UPDATED')
                      OR (status = 'ERROR' AND scan_attempts < ?)
                   ORDER BY created_at ASC, id ASC"#,
            )
            .bind(retry_limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_scalar(
                r#"SELECT id FROM catalog_records
                   WHERE status IN ('NEW', 'UPDATED')
                   ORDER BY created_at ASC, id ASC"#,
            )
            .fetch_all(&self.pool)
            .await?
        };
        Ok(ids)
    }

    /// Periodic file-intake loop, ticking until cancelled.
    pub async fn run_intake_loop(self: Arc<Self>, cancel: CancellationToken, tick: Duration) {
        tracing::info!("File-intake loop started (tick: {:?})", tick);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("File-intake loop received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(tick) => {
                    match self.run_intake_tick().await {
                        Ok(n) if n > 0 => {
                            tracing::info!("File-intake tick processed {} file(s)", n);
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("File-intake tick failed: {}", e),
                    }
                }
            }
        }
    }

    /// Periodic metadata-scan loop, ticking until cancelled.
    pub async fn run_metadata_loop(self: Arc<Self>, cancel: CancellationToken, tick: Duration) {
        tracing::info!("Metadata-scan loop started (tick: {:?})", tick);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Metadata-scan loop received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(tick) => {
                    match self.run_metadata_tick().await {
                        Ok(n) if n > 0 => {
                            tracing::info!("Metadata tick scanned {} record(s)", n);
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("Metadata tick failed: {}", e),
                    }
                }
            }
        }
    }
}

async fn mark_record_error(pool: &SqlitePool, record_id: i64) {
    if let Err(e) = sqlx::query(
        r#"UPDATE catalog_records
           SET status = 'ERROR', scan_attempts = scan_attempts + 1,
               updated_at = CURRENT_TIMESTAMP
           WHERE id = ?"#,
    )
    .bind(record_id)
    .execute(pool)
    .await
    {
        tracing::error!("Failed to mark record {} ERROR: {}", record_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::test_pool;
    use crate::models::{CatalogRecord, FileDescriptor, RecordKind, RecordStatus};
    use crate::parser::TagDictionaries;
    use crate::services::merge::{FieldValue, MergeEngine};
    use crate::services::registry::{MetadataScanner, ScanOutcome};
    use async_trait::async_trait;

    /// Scanner that fails for one specific title and succeeds for the rest.
    struct SelectiveScanner {
        fail_title: &'static str,
    }

    #[async_trait]
    impl MetadataScanner for SelectiveScanner {
        fn name(&self) -> &'static str {
            "selective"
        }

        fn supports(&self, _kind: RecordKind) -> bool {
            true
        }

        async fn resolve_external_id(
            &self,
            _pool: &SqlitePool,
            _record: &CatalogRecord,
        ) -> anyhow::Result<Option<String>> {
            Ok(None)
        }

        async fn scan(
            &self,
            pool: &SqlitePool,
            record: &CatalogRecord,
            merge: &MergeEngine,
        ) -> ScanOutcome {
            if record.title == self.fail_title {
                return ScanOutcome::Error;
            }
            let _ = merge
                .apply(
                    pool,
                    record.id,
                    "plot",
                    FieldValue::Text("scanned".into()),
                    "selective",
                )
                .await;
            ScanOutcome::Ok
        }
    }

    async fn setup() -> (SqlitePool, Arc<Settings>, ScanScheduler) {
        let pool = test_pool().await;
        let settings = Arc::new(Settings::new(pool.clone()));
        settings.seed_defaults().await.expect("seed");
        settings
            .set("scanner.priority", "selective")
            .await
            .expect("set priority");

        let intake = Arc::new(StagingIntake::new(
            pool.clone(),
            settings.clone(),
            TagDictionaries::default(),
        ));
        let mut registry = ScannerRegistry::new(settings.clone());
        registry.register(Arc::new(SelectiveScanner {
            fail_title: "Bad Movie",
        }));

        let scheduler = ScanScheduler::new(
            pool.clone(),
            settings.clone(),
            intake,
            Arc::new(registry),
        );
        (pool, settings, scheduler)
    }

    async fn insert_record(pool: &SqlitePool, identifier: &str, title: &str) -> i64 {
        sqlx::query_scalar(
            r#"INSERT INTO catalog_records (identifier, kind, title, status)
               VALUES (?, 'movie', ?, 'NEW') RETURNING id"#,
        )
        .bind(identifier)
        .bind(title)
        .fetch_one(pool)
        .await
        .expect("insert record")
    }

    async fn record_status(pool: &SqlitePool, id: i64) -> RecordStatus {
        sqlx::query_scalar("SELECT status FROM catalog_records WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .expect("status")
    }

    #[tokio::test]
    async fn test_metadata_tick_isolates_failures() {
        let (pool, _settings, scheduler) = setup().await;

        let bad = insert_record(&pool, "Bad2000", "Bad Movie").await;
        let good_a = insert_record(&pool, "GoodA2000", "Good Movie A").await;
        let good_b = insert_record(&pool, "GoodB2000", "Good Movie B").await;

        let scanned = scheduler.run_metadata_tick().await.expect("tick");
        assert_eq!(scanned, 3);

        // The failing record ends ERROR; its batch siblings still reach DONE.
        assert_eq!(record_status(&pool, bad).await, RecordStatus::Error);
        assert_eq!(record_status(&pool, good_a).await, RecordStatus::Done);
        assert_eq!(record_status(&pool, good_b).await, RecordStatus::Done);
    }

    #[tokio::test]
    async fn test_error_records_not_repolled_by_default() {
        let (pool, _settings, scheduler) = setup().await;

        let bad = insert_record(&pool, "Bad2000", "Bad Movie").await;
        scheduler.run_metadata_tick().await.expect("tick");
        assert_eq!(record_status(&pool, bad).await, RecordStatus::Error);

        // The next tick finds nothing: ERROR is not poll-eligible.
        let scanned = scheduler.run_metadata_tick().await.expect("tick");
        assert_eq!(scanned, 0);

        // An explicit reset makes it eligible again.
        sqlx::query("UPDATE catalog_records SET status = 'UPDATED' WHERE id = ?")
            .bind(bad)
            .execute(&pool)
            .await
            .expect("reset");
        let scanned = scheduler.run_metadata_tick().await.expect("tick");
        assert_eq!(scanned, 1);
    }

    #[tokio::test]
    async fn test_bounded_retry_when_enabled() {
        let (pool, settings, scheduler) = setup().await;
        settings.set("scanner.retry_errors", "true").await.expect("set");
        settings.set("scanner.retry_limit", "2").await.expect("set");

        let bad = insert_record(&pool, "Bad2000", "Bad Movie").await;

        // Attempt 1 (NEW), attempt 2 (ERROR retry), then the limit cuts it off.
        assert_eq!(scheduler.run_metadata_tick().await.expect("tick"), 1);
        assert_eq!(scheduler.run_metadata_tick().await.expect("tick"), 1);
        assert_eq!(scheduler.run_metadata_tick().await.expect("tick"), 0);

        let attempts: i64 =
            sqlx::query_scalar("SELECT scan_attempts FROM catalog_records WHERE id = ?")
                .bind(bad)
                .fetch_one(&pool)
                .await
                .expect("attempts");
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_intake_tick_drains_and_isolates_bad_files() {
        let (pool, _settings, scheduler) = setup().await;

        let good = FileDescriptor {
            name: "Avatar (2009).mkv".to_string(),
            size: 100,
            modified_at: 1000,
            container: None,
            nfo_text: None,
        };
        // Extension only: no title can be derived, processing must fail.
        let bad = FileDescriptor {
            name: ".mkv".to_string(),
            size: 100,
            modified_at: 1000,
            container: None,
            nfo_text: None,
        };
        scheduler
            .intake
            .ingest_file(&good, "/media")
            .await
            .expect("ingest good");
        scheduler
            .intake
            .ingest_file(&bad, "/media")
            .await
            .expect("ingest bad");

        let processed = scheduler.run_intake_tick().await.expect("tick");
        assert_eq!(processed, 2);

        let statuses: Vec<(String, String)> =
            sqlx::query_as("SELECT file_name, status FROM staged_files ORDER BY file_name")
                .fetch_all(&pool)
                .await
                .expect("statuses");
        assert_eq!(
            statuses,
            vec![
                (".mkv".to_string(), "ERROR".to_string()),
                ("Avatar (2009).mkv".to_string(), "DONE".to_string()),
            ]
        );
    }
}
