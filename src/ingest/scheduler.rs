//! Chunk scheduling: cut the upload into fixed-size chunks and run them
//! concurrently behind a counting admission gate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use csv_async::{AsyncReaderBuilder, StringRecord, Trim};
use tokio::io::AsyncRead;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::auth::{JwtService, PasswordService};
use crate::ingest::aggregate::aggregate;
use crate::ingest::config::IngestConfig;
use crate::ingest::error::{ChunkError, IngestError};
use crate::ingest::processor::ChunkProcessor;
use crate::ingest::types::{ChunkSummary, IngestResult, IngestTarget, RawRow};
use crate::store::IngestStore;

type ChunkOutcome = (usize, Result<ChunkSummary, ChunkError>);

/// Entry point of the pipeline, shared as managed state by the upload route.
pub struct Ingestor {
    processor: ChunkProcessor,
    jwt: Arc<JwtService>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn IngestStore>,
        passwords: Arc<PasswordService>,
        jwt: Arc<JwtService>,
        config: IngestConfig,
    ) -> Self {
        Self {
            processor: ChunkProcessor::new(store, passwords),
            jwt,
            config,
        }
    }

    /// Ingest a whole CSV stream into `target`.
    ///
    /// Every row of the run shares one ingestion timestamp. The first failing
    /// chunk fails the run; chunks that completed before it stay written.
    pub async fn ingest<R>(&self, reader: R, target: IngestTarget) -> Result<IngestResult, IngestError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let ingested_at = Utc::now();
        log::info!(
            "starting {} ingestion (chunk_size={}, max_concurrency={})",
            target,
            self.config.chunk_size,
            self.config.max_concurrency
        );

        let mut summaries = match self.run(reader, target, ingested_at).await {
            Ok(summaries) => summaries,
            Err(err) => {
                log::warn!("{} ingestion failed: {}", target, err);
                return Err(err);
            }
        };
        summaries.sort_by_key(|(index, _)| *index);

        let result = aggregate(
            summaries.into_iter().map(|(_, summary)| summary),
            target,
            &self.jwt,
        )?;
        log::info!("{} ingestion complete: {} rows", target, result.rows);
        Ok(result)
    }

    async fn run<R>(
        &self,
        reader: R,
        target: IngestTarget,
        ingested_at: DateTime<Utc>,
    ) -> Result<Vec<(usize, ChunkSummary)>, IngestError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let gate = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks: JoinSet<ChunkOutcome> = JoinSet::new();
        let result = self
            .schedule(reader, target, ingested_at, &gate, &mut tasks)
            .await;
        if result.is_err() {
            // Queued chunks fail with `GateClosed`; chunks already holding a
            // permit run to completion and their writes stand.
            gate.close();
            tasks.detach_all();
        }
        result
    }

    async fn schedule<R>(
        &self,
        reader: R,
        target: IngestTarget,
        ingested_at: DateTime<Utc>,
        gate: &Arc<Semaphore>,
        tasks: &mut JoinSet<ChunkOutcome>,
    ) -> Result<Vec<(usize, ChunkSummary)>, IngestError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut csv = AsyncReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::Headers)
            .create_reader(reader);

        let headers = strip_bom(csv.headers().await?.clone());
        if headers.iter().all(str::is_empty) {
            return Err(IngestError::MissingHeader);
        }
        let headers = Arc::new(headers);

        let chunk_size = self.config.chunk_size.max(1);
        let mut summaries = Vec::new();
        let mut chunk = Vec::with_capacity(chunk_size);
        let mut next_index = 0;
        let mut record = StringRecord::new();
        let mut rows_read: u64 = 0;

        while csv.read_record(&mut record).await? {
            rows_read += 1;
            let line = record
                .position()
                .map(|position| position.line())
                .unwrap_or(rows_read + 1);
            chunk.push(RawRow::new(
                line,
                Arc::clone(&headers),
                std::mem::take(&mut record),
            ));

            if chunk.len() == chunk_size {
                let full = std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size));
                drain_finished(tasks, &mut summaries)?;
                self.spawn_chunk(tasks, gate, next_index, full, target, ingested_at);
                next_index += 1;
            }
        }

        if !chunk.is_empty() {
            self.spawn_chunk(tasks, gate, next_index, chunk, target, ingested_at);
            next_index += 1;
        }
        log::debug!(
            "{} rows read into {} chunks, awaiting completion",
            rows_read,
            next_index
        );

        while let Some(joined) = tasks.join_next().await {
            collect(joined?, &mut summaries)?;
        }

        Ok(summaries)
    }

    fn spawn_chunk(
        &self,
        tasks: &mut JoinSet<ChunkOutcome>,
        gate: &Arc<Semaphore>,
        index: usize,
        chunk: Vec<RawRow>,
        target: IngestTarget,
        ingested_at: DateTime<Utc>,
    ) {
        log::debug!("scheduling chunk {} ({} rows)", index, chunk.len());
        tasks.spawn(run_chunk(
            Arc::clone(gate),
            self.processor.clone(),
            index,
            chunk,
            target,
            ingested_at,
        ));
    }
}

/// Spreadsheet exports often start with a UTF-8 byte order mark.
fn strip_bom(headers: StringRecord) -> StringRecord {
    let has_bom = headers
        .get(0)
        .is_some_and(|first| first.starts_with('\u{feff}'));
    if !has_bom {
        return headers;
    }
    headers
        .iter()
        .enumerate()
        .map(|(index, header)| {
            if index == 0 {
                header.trim_start_matches('\u{feff}').trim()
            } else {
                header
            }
        })
        .collect()
}

/// Body of one chunk task. The permit is held for the whole chunk.
async fn run_chunk(
    gate: Arc<Semaphore>,
    processor: ChunkProcessor,
    index: usize,
    chunk: Vec<RawRow>,
    target: IngestTarget,
    ingested_at: DateTime<Utc>,
) -> ChunkOutcome {
    let result = match gate.acquire_owned().await {
        Ok(_permit) => processor.process(chunk, target, ingested_at).await,
        Err(_) => Err(ChunkError::GateClosed),
    };
    (index, result)
}

/// Collect tasks that already finished so failures surface early.
fn drain_finished(
    tasks: &mut JoinSet<ChunkOutcome>,
    summaries: &mut Vec<(usize, ChunkSummary)>,
) -> Result<(), IngestError> {
    while let Some(joined) = tasks.try_join_next() {
        collect(joined?, summaries)?;
    }
    Ok(())
}

fn collect(
    (index, result): ChunkOutcome,
    summaries: &mut Vec<(usize, ChunkSummary)>,
) -> Result<(), IngestError> {
    match result {
        Ok(summary) => {
            log::debug!("chunk {} done ({} rows)", index, summary.row_count);
            summaries.push((index, summary));
            Ok(())
        }
        Err(source) => Err(IngestError::Chunk { index, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::tests::make_test_config;
    use crate::ingest::coerce::tests::cheap_passwords;
    use crate::ingest::error::CoerceError;
    use crate::ingest::types::{ExistenceMarker, MetricRecord, UserAccount, UserImportRecord};
    use crate::store::{MemoryStore, StoreError};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const METRIC_HEADER: &str =
        "date,account_id,campaign_id,cost_micros,clicks,conversions,impressions,interactions\n";

    /// Memory store that records batch sizes and peak concurrent writes.
    #[derive(Default)]
    struct InstrumentedStore {
        inner: MemoryStore,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        batches: Mutex<Vec<usize>>,
        fail_on_account: Option<i64>,
    }

    impl InstrumentedStore {
        fn batches(&self) -> Vec<usize> {
            let mut batches = self.batches.lock().unwrap().clone();
            batches.sort_unstable();
            batches
        }
    }

    #[rocket::async_trait]
    impl IngestStore for InstrumentedStore {
        async fn insert_metrics(&self, records: &[MetricRecord]) -> Result<u64, StoreError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.batches.lock().unwrap().push(records.len());
            if let Some(account) = self.fail_on_account {
                if records.iter().any(|record| record.account_id == account) {
                    return Err(StoreError::Unavailable("injected failure".into()));
                }
            }
            self.inner.insert_metrics(records).await
        }

        async fn insert_users(&self, records: &[UserImportRecord]) -> Result<u64, StoreError> {
            self.inner.insert_users(records).await
        }

        async fn insert_existence_markers(
            &self,
            markers: &[ExistenceMarker],
        ) -> Result<u64, StoreError> {
            self.inner.insert_existence_markers(markers).await
        }

        async fn find_users_by_identity(
            &self,
            identities: &[ExistenceMarker],
        ) -> Result<Vec<UserAccount>, StoreError> {
            self.inner.find_users_by_identity(identities).await
        }
    }

    fn jwt() -> Arc<JwtService> {
        Arc::new(JwtService::from_config(&make_test_config()).expect("jwt service"))
    }

    fn ingestor(store: Arc<dyn IngestStore>, chunk_size: usize) -> Ingestor {
        Ingestor::new(
            store,
            Arc::new(cheap_passwords()),
            jwt(),
            IngestConfig {
                chunk_size,
                max_concurrency: 10,
                upload_limit_mib: 1,
            },
        )
    }

    fn metrics_csv(rows: usize) -> String {
        let mut csv = String::from(METRIC_HEADER);
        for account in 0..rows {
            csv.push_str(&format!("2024-01-01,{account},1,1000,2,1,30,3\n"));
        }
        csv
    }

    #[tokio::test]
    async fn splits_uploads_into_fixed_size_chunks() {
        let store = Arc::new(InstrumentedStore::default());
        let csv = metrics_csv(450);

        let result = ingestor(store.clone(), 200)
            .ingest(csv.as_bytes(), IngestTarget::Metrics)
            .await
            .expect("ingestion succeeds");

        assert_eq!(result.status, "success");
        assert_eq!(result.rows, 450);
        assert_eq!(result.target, IngestTarget::Metrics);
        assert!(result.tokens.is_none());
        assert_eq!(store.batches(), vec![50, 200, 200]);
        assert_eq!(store.inner.metrics().len(), 450);
    }

    #[tokio::test]
    async fn reports_rows_attempted_including_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let csv = metrics_csv(30);
        let ingestor = ingestor(store.clone(), 7);

        let first = ingestor
            .ingest(csv.as_bytes(), IngestTarget::Metrics)
            .await
            .expect("first upload");
        let second = ingestor
            .ingest(csv.as_bytes(), IngestTarget::Metrics)
            .await
            .expect("second upload");

        assert_eq!(first.rows, 30);
        assert_eq!(second.rows, 30);
        assert_eq!(store.metrics().len(), 30);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn caps_concurrent_chunks() {
        let store = Arc::new(InstrumentedStore::default());
        let csv = metrics_csv(100);

        let result = ingestor(store.clone(), 2)
            .ingest(csv.as_bytes(), IngestTarget::Metrics)
            .await
            .expect("ingestion succeeds");

        assert_eq!(result.rows, 100);
        assert_eq!(store.batches().len(), 50);
        let peak = store.peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 10, "peak concurrency was {peak}");
    }

    #[tokio::test]
    async fn malformed_row_fails_the_run() {
        let store = Arc::new(MemoryStore::new());
        let mut csv = metrics_csv(10);
        csv.push_str("not-a-date,99,1,1000,2,1,30,3\n");

        let err = ingestor(store, 5)
            .ingest(csv.as_bytes(), IngestTarget::Metrics)
            .await
            .expect_err("run fails");

        match err {
            IngestError::Chunk {
                index,
                source: ChunkError::Coerce(CoerceError::MalformedRow { line, column, .. }),
            } => {
                assert_eq!(index, 2);
                assert_eq!(line, 12);
                assert_eq!(column, "date");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn store_failure_fails_the_run() {
        let store = Arc::new(InstrumentedStore {
            fail_on_account: Some(3),
            ..Default::default()
        });

        let err = ingestor(store, 4)
            .ingest(metrics_csv(12).as_bytes(), IngestTarget::Metrics)
            .await
            .expect_err("run fails");

        assert!(matches!(
            err,
            IngestError::Chunk {
                index: 0,
                source: ChunkError::Store(StoreError::Unavailable(_)),
            }
        ));
    }

    #[tokio::test]
    async fn failed_run_stops_queued_chunks() {
        let store = Arc::new(InstrumentedStore {
            fail_on_account: Some(0),
            ..Default::default()
        });
        let ingestor = Ingestor::new(
            store.clone(),
            Arc::new(cheap_passwords()),
            jwt(),
            IngestConfig {
                chunk_size: 1,
                max_concurrency: 1,
                upload_limit_mib: 1,
            },
        );

        ingestor
            .ingest(metrics_csv(20).as_bytes(), IngestTarget::Metrics)
            .await
            .expect_err("run fails");
        let written_at_return = store.inner.metrics().len();

        // Long enough for every queued chunk to finish if they were still admitted.
        tokio::time::sleep(Duration::from_millis(250)).await;

        let settled = store.inner.metrics().len();
        assert!(written_at_return <= 1, "written at return: {written_at_return}");
        assert!(settled <= 1, "rows written after failure: {settled}");
        assert!(store.batches().len() <= 2, "batches: {:?}", store.batches());
    }

    #[tokio::test]
    async fn strips_byte_order_mark_from_first_header() {
        let store = Arc::new(MemoryStore::new());
        let csv = format!("\u{feff}{METRIC_HEADER}2024-01-01,7,1,1000,2,1,30,3\n");

        let result = ingestor(store.clone(), 10)
            .ingest(csv.as_bytes(), IngestTarget::Metrics)
            .await
            .expect("header with byte order mark");

        assert_eq!(result.rows, 1);
        assert_eq!(store.metrics()[0].date.to_string(), "2024-01-01");
    }

    #[tokio::test]
    async fn rejects_uploads_without_a_header() {
        let err = ingestor(Arc::new(MemoryStore::new()), 10)
            .ingest(&b""[..], IngestTarget::Metrics)
            .await
            .expect_err("empty upload");
        assert!(matches!(err, IngestError::MissingHeader));
    }

    #[tokio::test]
    async fn header_only_upload_ingests_nothing() {
        let result = ingestor(Arc::new(MemoryStore::new()), 10)
            .ingest(METRIC_HEADER.as_bytes(), IngestTarget::Metrics)
            .await
            .expect("header only");
        assert_eq!(result.rows, 0);
    }

    #[tokio::test]
    async fn issues_one_token_per_imported_user() {
        let store = Arc::new(MemoryStore::new());
        let csv = "username,email,password,role\n\
                   alice,alice@example.com,pw-a,admin\n\
                   bob,bob@example.com,pw-b,\n\
                   carol,carol@example.com,pw-c,user\n";

        let result = ingestor(store.clone(), 2)
            .ingest(csv.as_bytes(), IngestTarget::Users)
            .await
            .expect("user import");

        assert_eq!(result.rows, 3);
        let tokens = result.tokens.expect("tokens for users");
        assert_eq!(tokens.len(), 3);

        let jwt = jwt();
        for issued in &tokens {
            let claims = jwt
                .decode_access_token(&issued.access_token)
                .expect("token decodes");
            assert_eq!(
                claims.identity(),
                Some((issued.username.as_str(), issued.email.as_str()))
            );
        }
        let alice = tokens
            .iter()
            .find(|token| token.username == "alice")
            .expect("alice token");
        let claims = jwt.decode_access_token(&alice.access_token).unwrap();
        assert_eq!(claims.role, "admin");
        assert_eq!(store.existence_markers().len(), 3);
    }

    #[tokio::test]
    async fn duplicate_users_across_chunks_get_one_token() {
        let store = Arc::new(MemoryStore::new());
        let csv = "username,email,password\n\
                   dave,dave@example.com,pw\n\
                   erin,erin@example.com,pw\n\
                   dave,dave@example.com,pw\n";

        let result = ingestor(store.clone(), 1)
            .ingest(csv.as_bytes(), IngestTarget::Users)
            .await
            .expect("user import");

        assert_eq!(result.rows, 3);
        assert_eq!(result.tokens.expect("tokens").len(), 2);
        assert_eq!(store.users().len(), 2);
    }
}
