use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use streammerge_error::Result;
use streammerge_io::{BlockSource, ReadRuntime};
use tracing::debug;

use crate::config::MergeConfig;
use crate::cursor::RowCursor;
use crate::decoder::{BlockDecoder, RowsetDecoder};
use crate::metrics::MergeMetrics;
use crate::scheduler::InflightScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergerState {
    /// Still producing rows.
    Running,
    /// Every source was read to completion.
    Exhausted,
    /// Stopped early, either by the caller or because a read failed.
    Stopped,
}

/// A single row produced by the merger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Index of the source this row came from.
    pub source: usize,

    /// One-based position of this row within its source.
    pub record_index: u64,

    /// Raw row bytes.
    pub data: Bytes,
}

impl Row {
    pub fn position(&self) -> RowPosition {
        RowPosition {
            source: self.source,
            record_index: self.record_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPosition {
    pub source: usize,
    pub record_index: u64,
}

/// Passed to the block boundary hook whenever the merger starts reading rows
/// from a new block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockBoundary {
    /// Source the new block belongs to.
    pub source: usize,

    /// Number of rows already emitted for this source.
    pub records_before: u64,

    /// Number of rows in the new block.
    pub num_rows: usize,
}

type BoundaryHook = Box<dyn FnMut(BlockBoundary) + Send>;

/// Merges blocks from many sources into a single stream of rows.
///
/// Reads are issued concurrently, up to the configured inflight limit. Rows
/// from a single source are always produced in order. Rows from different
/// sources may be interleaved arbitrarily.
///
/// Only a single thread should drive the merger, and it must not be called
/// from within an async context since `advance` blocks while waiting on
/// reads.
pub struct Merger {
    scheduler: InflightScheduler,
    cursor: RowCursor,

    /// Number of rows emitted per source so far.
    emitted: Vec<u64>,

    /// The current row, set after a successful advance.
    current: Option<Row>,

    state: MergerState,

    boundary_hook: Option<BoundaryHook>,
}

impl fmt::Debug for Merger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Merger")
            .field("scheduler", &self.scheduler)
            .field("cursor", &self.cursor)
            .field("emitted", &self.emitted)
            .field("current", &self.current)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Merger {
    /// Create a merger over sources using the default rowset decoder.
    pub fn try_new(
        sources: Vec<Box<dyn BlockSource>>,
        runtime: Arc<dyn ReadRuntime>,
        config: MergeConfig,
    ) -> Result<Self> {
        Self::try_new_with_decoder(sources, Arc::new(RowsetDecoder), runtime, config)
    }

    pub fn try_new_with_decoder(
        sources: Vec<Box<dyn BlockSource>>,
        decoder: Arc<dyn BlockDecoder>,
        runtime: Arc<dyn ReadRuntime>,
        config: MergeConfig,
    ) -> Result<Self> {
        let num_sources = sources.len();
        debug!(%num_sources, inflight_limit = %config.inflight_limit, "creating merger");

        let scheduler = InflightScheduler::try_new(sources, decoder, runtime, config)?;

        Ok(Merger {
            scheduler,
            cursor: RowCursor::new(),
            emitted: vec![0; num_sources],
            current: None,
            state: MergerState::Running,
            boundary_hook: None,
        })
    }

    /// Register a hook to be called each time the merger starts reading a
    /// new block.
    ///
    /// Replaces any previously registered hook.
    pub fn on_block_boundary(&mut self, hook: impl FnMut(BlockBoundary) + Send + 'static) {
        self.boundary_hook = Some(Box::new(hook));
    }

    pub fn state(&self) -> MergerState {
        self.state
    }

    /// If the merger is positioned on a row.
    pub fn is_valid(&self) -> bool {
        self.state == MergerState::Running && self.current.is_some()
    }

    /// Get the current row.
    pub fn current(&self) -> Option<&Row> {
        if self.state != MergerState::Running {
            return None;
        }
        self.current.as_ref()
    }

    /// Source and record index of the current row.
    pub fn position(&self) -> Option<RowPosition> {
        self.current().map(|row| row.position())
    }

    /// Number of rows emitted so far for a source.
    ///
    /// Returns None if there's no source at that index.
    pub fn records_emitted(&self, source: usize) -> Option<u64> {
        self.emitted.get(source).copied()
    }

    pub fn metrics(&self) -> &MergeMetrics {
        self.scheduler.metrics()
    }

    /// Move to the next row.
    ///
    /// Returns false once all sources are exhausted, or if the merger was
    /// already stopped. A read failure is returned as an error and stops the
    /// merger.
    pub fn advance(&mut self) -> Result<bool> {
        if self.state != MergerState::Running {
            return Ok(false);
        }

        match self.advance_inner() {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.state = MergerState::Exhausted;
                self.current = None;
                let metrics = self.scheduler.metrics();
                debug!(
                    rows = %metrics.total_rows(),
                    reads = %metrics.total_reads(),
                    peak_inflight = %metrics.peak_inflight,
                    waits = %metrics.waits,
                    "merger exhausted"
                );
                Ok(false)
            }
            Err(e) => {
                debug!(%e, "stopping merger after error");
                self.stop();
                Err(e)
            }
        }
    }

    /// Stop the merger early.
    ///
    /// Releases any rows still held by the cursor. Reads that are still in
    /// flight aren't canceled, their results are discarded when they arrive.
    /// Further calls to `advance` return false.
    pub fn finish(&mut self) {
        if self.state != MergerState::Running {
            return;
        }
        debug!("finishing merger early");
        self.stop();
    }

    fn stop(&mut self) {
        self.state = MergerState::Stopped;
        self.current = None;
        self.cursor.release();
        self.scheduler.shutdown();
    }

    fn advance_inner(&mut self) -> Result<bool> {
        loop {
            let has_pending = self.scheduler.top_up()?;
            if !has_pending && !self.cursor.is_valid() {
                return Ok(false);
            }

            if let Some(data) = self.cursor.current() {
                let source = self
                    .cursor
                    .source()
                    .expect("bound cursor to have a source");

                self.emitted[source] += 1;
                self.scheduler.metrics_mut().sources[source].rows_emitted += 1;
                self.current = Some(Row {
                    source,
                    record_index: self.emitted[source],
                    data,
                });
                self.cursor.advance();

                return Ok(true);
            }

            match self.scheduler.pop_ready() {
                Some(result) => {
                    if let Some(hook) = self.boundary_hook.as_mut() {
                        hook(BlockBoundary {
                            source: result.source_idx,
                            records_before: self.emitted[result.source_idx],
                            num_rows: result.payload.num_rows(),
                        });
                    }
                    self.cursor.bind(result.payload);
                }
                None => self.scheduler.wait_for_completion()?,
            }
        }
    }
}

impl Iterator for Merger {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(true) => self.current.clone().map(Ok),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
