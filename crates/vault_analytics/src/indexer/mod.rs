//! Event indexer: one writer pulls ranges from a data source into the
//! append-only log; readers take snapshots.

mod log;

pub use log::{AppendOutcome, EventLog, LogSnapshot};

use crate::chain::{AdapterError, DataSource, EventFilter, RejectedRecord, RetryPolicy};
use crate::conservation::{fold_ghost_variables, GhostVariables};
use crate::events::{IndexedEvent, SchemaError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_BLOCK_SPAN: u64 = 5_000;

/// What to do when a fetched range contains records that fail validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchemaPolicy {
    /// Log each rejected record and commit the rest.
    #[default]
    Skip,
    /// Fail the range before anything is committed.
    Abort,
}

#[derive(Clone, Debug)]
pub struct IndexerConfig {
    pub start_block: u64,
    /// Blocks per fetched range.
    pub block_span: u64,
    pub schema_policy: SchemaPolicy,
    pub retry: RetryPolicy,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            block_span: DEFAULT_BLOCK_SPAN,
            schema_policy: SchemaPolicy::Skip,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("another ingestion is already running")]
    WriterBusy,
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("blocks {from}..={to}: {error}")]
    Schema {
        from: u64,
        to: u64,
        error: SchemaError,
    },
}

/// Summary of one `ingest` call.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IngestReport {
    pub from_block: u64,
    pub to_block: u64,
    pub ranges: usize,
    #[serde(flatten)]
    pub outcome: AppendOutcome,
    pub rejected: Vec<RejectedRecord>,
}

#[derive(Debug, Default)]
struct State {
    log: EventLog,
    /// Next block to fetch.
    cursor: u64,
}

/// Clears the writer flag when the ingest future finishes or is dropped.
struct WriterGuard<'a>(&'a AtomicBool);

impl<'a> WriterGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, IndexerError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| IndexerError::WriterBusy)?;
        Ok(Self(flag))
    }
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Indexer {
    config: IndexerConfig,
    state: RwLock<State>,
    writing: AtomicBool,
}

impl Indexer {
    pub fn new(config: IndexerConfig) -> Self {
        let state = State {
            log: EventLog::new(),
            cursor: config.start_block,
        };
        Self {
            config,
            state: RwLock::new(state),
            writing: AtomicBool::new(false),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Next block the ingestion loop will request.
    pub fn cursor(&self) -> u64 {
        self.read().cursor
    }

    pub fn len(&self) -> usize {
        self.read().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().log.is_empty()
    }

    /// Pull `[cursor, min(to_block, head)]` in `block_span` ranges. Each range is
    /// fetched with retry, then appended and the cursor advanced under one
    /// write lock. Dropping the future between commits leaves the cursor at
    /// the last committed range.
    pub async fn ingest(
        &self,
        source: &DataSource,
        to_block: Option<u64>,
    ) -> Result<IngestReport, IndexerError> {
        let writer = WriterGuard::acquire(&self.writing)?;
        self.ingest_locked(&writer, source, to_block).await
    }

    async fn ingest_locked(
        &self,
        _writer: &WriterGuard<'_>,
        source: &DataSource,
        to_block: Option<u64>,
    ) -> Result<IngestReport, IndexerError> {
        let retry = self.config.retry;

        retry.run(|| source.precheck()).await?;
        let head = retry.run(|| source.head_block()).await?;
        let target = to_block.map_or(head, |t| t.min(head));
        let mut cursor = self.cursor();
        let mut report = IngestReport {
            from_block: cursor,
            to_block: target,
            ..Default::default()
        };
        let span = self.config.block_span.max(1);

        while cursor <= target {
            let end = cursor.saturating_add(span - 1).min(target);
            let filter = EventFilter::range(cursor, Some(end));
            let batch = retry.run(|| source.fetch_events(&filter)).await?;

            if let Some(first) = batch.rejected.first() {
                if self.config.schema_policy == SchemaPolicy::Abort {
                    return Err(IndexerError::Schema {
                        from: cursor,
                        to: end,
                        error: first.error.clone(),
                    });
                }
                for r in &batch.rejected {
                    warn!(from = cursor, to = end, error = %r.error, "skipping rejected record");
                }
            }

            let outcome = {
                let mut state = self.write();
                let outcome = state.log.append_batch(batch.events);
                state.cursor = end.saturating_add(1);
                outcome
            };
            info!(
                from = cursor,
                to = end,
                appended = outcome.appended,
                duplicates = outcome.duplicates,
                backend = %source.backend(),
                "committed range"
            );
            report.ranges += 1;
            report.outcome.merge(outcome);
            report.rejected.extend(batch.rejected);

            if end == u64::MAX {
                break;
            }
            cursor = end + 1;
        }
        Ok(report)
    }

    /// Re-query everything from block 0. Events already in the log are
    /// dropped as duplicates, so the log only ever grows. The writer slot is
    /// held from the cursor reset to the end of the walk.
    pub async fn replay_from_genesis(&self, source: &DataSource) -> Result<IngestReport, IndexerError> {
        let writer = WriterGuard::acquire(&self.writing)?;
        self.write().cursor = 0;
        self.ingest_locked(&writer, source, None).await
    }

    /// Events matching `filter`, in log order.
    pub fn query(&self, filter: &EventFilter) -> Vec<IndexedEvent> {
        self.snapshot()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> LogSnapshot {
        self.read().log.snapshot()
    }

    /// Fold the whole log into running totals.
    pub fn snapshot_ghost_variables(&self, default_denomination: &str) -> GhostVariables {
        fold_ghost_variables(&self.snapshot(), default_denomination)
    }
}
