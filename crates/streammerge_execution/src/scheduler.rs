use std::fmt;
use std::sync::Arc;
use streammerge_error::{Result, StreamMergeError};
use streammerge_io::{BlockSource, ReadRuntime};
use tracing::{debug, trace};

use crate::config::MergeConfig;
use crate::decoder::{BlockDecoder, DecodedBlock};
use crate::metrics::MergeMetrics;
use crate::queue::{result_queue, Completion, CompletionSender, PendingResult, ResultQueue};

/// Where a source currently is in its lifecycle.
enum SourceSlot {
    /// Source is home and can be read from.
    Idle(Box<dyn BlockSource>),
    /// Source is owned by an outstanding read.
    Reading,
    /// Source returned its terminal block.
    Done,
}

impl fmt::Debug for SourceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle(_) => write!(f, "Idle"),
            Self::Reading => write!(f, "Reading"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// Launches reads across sources while keeping the number of outstanding
/// reads under the inflight limit.
///
/// All state here is only touched by the consuming thread. Read tasks only
/// ever communicate back through the completion channel.
#[derive(Debug)]
pub struct InflightScheduler {
    slots: Vec<SourceSlot>,

    /// Round-robin cursor, the index the next scan for an eligible source
    /// starts at.
    next_source: usize,

    /// Number of reads launched whose completions haven't been received.
    inflight: usize,

    /// Number of sources that are done.
    num_done: usize,

    inflight_limit: usize,
    rewind_on_completion: bool,

    decoder: Arc<dyn BlockDecoder>,
    runtime: Arc<dyn ReadRuntime>,

    sender: CompletionSender,
    queue: ResultQueue,

    metrics: MergeMetrics,
}

impl InflightScheduler {
    pub fn try_new(
        sources: Vec<Box<dyn BlockSource>>,
        decoder: Arc<dyn BlockDecoder>,
        runtime: Arc<dyn ReadRuntime>,
        config: MergeConfig,
    ) -> Result<Self> {
        config.validate()?;

        let num_sources = sources.len();
        // A source has at most one read out, so the channel never needs to
        // hold more completions than there are sources.
        let (sender, queue) = result_queue(config.inflight_limit.min(num_sources).max(1));

        Ok(InflightScheduler {
            slots: sources.into_iter().map(SourceSlot::Idle).collect(),
            next_source: 0,
            inflight: 0,
            num_done: 0,
            inflight_limit: config.inflight_limit,
            rewind_on_completion: config.rewind_on_completion,
            decoder,
            runtime,
            sender,
            queue,
            metrics: MergeMetrics::new(num_sources),
        })
    }

    pub fn inflight(&self) -> usize {
        self.inflight
    }

    /// If the source returned its terminal block. None if there's no
    /// source at that index.
    pub fn is_done(&self, source_idx: usize) -> Option<bool> {
        self.slots
            .get(source_idx)
            .map(|slot| matches!(slot, SourceSlot::Done))
    }

    pub fn metrics(&self) -> &MergeMetrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut MergeMetrics {
        &mut self.metrics
    }

    /// Process any completions that have already arrived, then launch reads
    /// for eligible sources until we hit a limit or run out of sources.
    ///
    /// Returns false once every source is done, nothing is in flight, and no
    /// decoded payloads are waiting. The row cursor isn't visible from here,
    /// the caller has to check that separately.
    pub fn top_up(&mut self) -> Result<bool> {
        while let Some(completion) = self.queue.try_recv() {
            self.handle_completion(completion)?;
        }

        let num_sources = self.slots.len();
        let mut scanned = 0;
        while scanned < num_sources
            && self.inflight < self.inflight_limit
            && self.queue.len() < self.inflight_limit
        {
            let idx = self.next_source;
            self.next_source = (self.next_source + 1) % num_sources;
            scanned += 1;

            if matches!(self.slots[idx], SourceSlot::Idle(_)) {
                self.dispatch(idx);
            }
        }

        Ok(!self.is_finished())
    }

    /// Block until at least one outstanding read completes and process it.
    ///
    /// Panics if there are no reads in flight, since we'd otherwise wait
    /// forever.
    pub fn wait_for_completion(&mut self) -> Result<()> {
        assert!(
            self.inflight > 0,
            "waiting for a completion with no reads in flight"
        );

        self.metrics.waits += 1;
        let completion = self
            .queue
            .recv_blocking()
            .expect("completion channel to stay open while scheduler holds a sender");
        self.handle_completion(completion)?;

        // Drain anything else that came in while we were waiting.
        while let Some(completion) = self.queue.try_recv() {
            self.handle_completion(completion)?;
        }

        Ok(())
    }

    /// Pop the oldest decoded payload.
    pub fn pop_ready(&mut self) -> Option<PendingResult> {
        self.queue.pop_front()
    }

    /// Stop accepting completions.
    ///
    /// Outstanding reads are left to run, their results get dropped on
    /// arrival.
    pub fn shutdown(&mut self) {
        if self.inflight > 0 {
            debug!(inflight = %self.inflight, "abandoning outstanding reads");
        }
        self.queue.close();
        self.inflight = 0;
    }

    fn is_finished(&self) -> bool {
        self.num_done == self.slots.len() && self.inflight == 0 && self.queue.is_empty()
    }

    fn dispatch(&mut self, idx: usize) {
        let mut source = match std::mem::replace(&mut self.slots[idx], SourceSlot::Reading) {
            SourceSlot::Idle(source) => source,
            other => panic!("attempted to dispatch read for source {idx} in state {other:?}"),
        };

        self.inflight += 1;
        self.metrics.peak_inflight = self.metrics.peak_inflight.max(self.inflight);
        trace!(%idx, inflight = %self.inflight, "dispatching read");

        let decoder = self.decoder.clone();
        let mut sender = self.sender.clone();

        self.runtime.spawn(Box::pin(async move {
            let outcome = match source.read().await {
                Ok(block) => decoder.decode(idx, block),
                Err(e) => Err(StreamMergeError::with_source(
                    format!("Failed to read block from source {idx}"),
                    Box::new(e),
                )),
            };

            let completion = Completion {
                source_idx: idx,
                source,
                outcome,
            };

            if !sender.send(completion).await {
                trace!(%idx, "consumer gone, discarding completed read");
            }
        }));
    }

    fn handle_completion(&mut self, completion: Completion) -> Result<()> {
        let Completion {
            source_idx,
            source,
            outcome,
        } = completion;

        assert!(
            matches!(self.slots[source_idx], SourceSlot::Reading),
            "received completion for source {source_idx} with no outstanding read"
        );
        self.inflight -= 1;
        self.metrics.sources[source_idx].reads += 1;

        if self.rewind_on_completion && source_idx < self.next_source {
            self.next_source = source_idx;
        }

        match outcome? {
            DecodedBlock::Skip => {
                trace!(%source_idx, "skipping control block");
                self.metrics.sources[source_idx].skipped_blocks += 1;
                self.slots[source_idx] = SourceSlot::Idle(source);
            }
            DecodedBlock::End => {
                debug!(%source_idx, "source done");
                self.num_done += 1;
                self.slots[source_idx] = SourceSlot::Done;
            }
            DecodedBlock::Rows(payload) => {
                trace!(%source_idx, rows = %payload.num_rows(), "received payload");
                self.metrics.sources[source_idx].data_blocks += 1;
                self.slots[source_idx] = SourceSlot::Idle(source);
                self.queue.push(PendingResult {
                    source_idx,
                    payload,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use streammerge_io::memory::MemoryBlockSource;

    use super::*;
    use crate::decoder::{encode_control_block, encode_rows_block, RowsetDecoder};
    use crate::testutil::ManualRuntime;

    fn rows_block(rows: &[&str]) -> Bytes {
        encode_rows_block(rows.iter().map(|r| r.as_bytes()))
    }

    fn scheduler(
        sources: Vec<MemoryBlockSource>,
        limit: usize,
        rewind: bool,
    ) -> (InflightScheduler, Arc<ManualRuntime>) {
        let runtime = Arc::new(ManualRuntime::default());
        let sources = sources
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn BlockSource>)
            .collect();
        let config = MergeConfig::default()
            .with_inflight_limit(limit)
            .with_rewind_on_completion(rewind);
        let scheduler =
            InflightScheduler::try_new(sources, Arc::new(RowsetDecoder), runtime.clone(), config)
                .unwrap();
        (scheduler, runtime)
    }

    #[test]
    fn no_sources_finishes_immediately() {
        let (mut scheduler, runtime) = scheduler(Vec::new(), 2, false);
        assert!(!scheduler.top_up().unwrap());
        assert_eq!(0, runtime.num_pending());
    }

    #[test]
    fn top_up_respects_limit() {
        let sources = (0..5)
            .map(|_| MemoryBlockSource::new([rows_block(&["a"])]))
            .collect();
        let (mut scheduler, runtime) = scheduler(sources, 2, false);

        assert!(scheduler.top_up().unwrap());
        assert_eq!(2, scheduler.inflight());
        assert_eq!(2, runtime.num_pending());

        // Nothing completed, calling again shouldn't launch more.
        assert!(scheduler.top_up().unwrap());
        assert_eq!(2, runtime.num_pending());
    }

    #[test]
    fn one_read_per_source() {
        let sources = vec![MemoryBlockSource::new([rows_block(&["a"]), rows_block(&["b"])])];
        let (mut scheduler, runtime) = scheduler(sources, 4, false);

        scheduler.top_up().unwrap();
        scheduler.top_up().unwrap();
        assert_eq!(1, scheduler.inflight());
        assert_eq!(1, runtime.num_pending());
    }

    /// Run the scheduler to completion, completing reads as soon as they're
    /// launched. Returns source indices of payloads in the order received.
    fn payload_order(scheduler: &mut InflightScheduler, runtime: &ManualRuntime) -> Vec<usize> {
        let mut order = Vec::new();
        while scheduler.top_up().unwrap() {
            runtime.run_all();
            if scheduler.inflight() > 0 {
                scheduler.wait_for_completion().unwrap();
            }
            while let Some(result) = scheduler.pop_ready() {
                order.push(result.source_idx);
            }
        }
        order
    }

    #[test]
    fn round_robin_dispatch_order() {
        let sources = (0..3)
            .map(|_| MemoryBlockSource::new([rows_block(&["a"]), rows_block(&["b"])]))
            .collect();
        let (mut scheduler, runtime) = scheduler(sources, 1, false);

        let order = payload_order(&mut scheduler, &runtime);
        assert_eq!(vec![0, 1, 2, 0, 1, 2], order);
    }

    #[test]
    fn rewind_revisits_completed_source() {
        let sources = (0..3)
            .map(|_| MemoryBlockSource::new([rows_block(&["a"]), rows_block(&["b"])]))
            .collect();
        let (mut scheduler, runtime) = scheduler(sources, 1, true);

        // With a single read in flight the source that just completed is
        // always the one we rewind to, so each source is drained in turn.
        let order = payload_order(&mut scheduler, &runtime);
        assert_eq!(vec![0, 0, 1, 1, 2, 2], order);
    }

    #[test]
    fn completions_out_of_order() {
        let sources = vec![
            MemoryBlockSource::new([rows_block(&["a1"])]),
            MemoryBlockSource::new([rows_block(&["b1"])]),
            MemoryBlockSource::new([rows_block(&["c1"])]),
        ];
        let (mut scheduler, runtime) = scheduler(sources, 3, false);

        scheduler.top_up().unwrap();
        assert_eq!(3, runtime.num_pending());

        runtime.run_task(2);
        runtime.run_task(0);
        scheduler.top_up().unwrap();

        // Queue is in completion order.
        assert_eq!(2, scheduler.pop_ready().unwrap().source_idx);
        assert_eq!(0, scheduler.pop_ready().unwrap().source_idx);
        assert!(scheduler.pop_ready().is_none());

        // Sources 0 and 2 went idle and were dispatched again, source 1 is
        // still out on its first read.
        assert_eq!(3, scheduler.inflight());
        assert_eq!(3, runtime.num_pending());
    }

    #[test]
    fn skip_and_end_release_slots() {
        let sources = vec![MemoryBlockSource::new([
            encode_control_block(b"stats"),
            rows_block(&["a"]),
        ])];
        let (mut scheduler, runtime) = scheduler(sources, 1, false);

        // Control block.
        scheduler.top_up().unwrap();
        runtime.run_all();
        scheduler.wait_for_completion().unwrap();
        assert_eq!(0, scheduler.inflight());
        assert!(scheduler.pop_ready().is_none());

        // Data block.
        scheduler.top_up().unwrap();
        runtime.run_all();
        scheduler.wait_for_completion().unwrap();
        assert!(scheduler.pop_ready().is_some());

        // End of stream.
        assert!(scheduler.top_up().unwrap());
        runtime.run_all();
        scheduler.wait_for_completion().unwrap();
        assert_eq!(Some(true), scheduler.is_done(0));
        assert_eq!(None, scheduler.is_done(1));
        assert!(!scheduler.top_up().unwrap());

        let metrics = scheduler.metrics();
        assert_eq!(3, metrics.sources[0].reads);
        assert_eq!(1, metrics.sources[0].skipped_blocks);
        assert_eq!(1, metrics.sources[0].data_blocks);
        assert_eq!(1, metrics.peak_inflight);
    }

    #[test]
    fn queue_length_limits_dispatch() {
        let sources = (0..3)
            .map(|_| MemoryBlockSource::new([rows_block(&["a"])]))
            .collect();
        let (mut scheduler, runtime) = scheduler(sources, 2, false);

        scheduler.top_up().unwrap();
        runtime.run_all();
        scheduler.wait_for_completion().unwrap();

        // Two payloads waiting, queue at the limit, nothing new launched.
        scheduler.top_up().unwrap();
        assert_eq!(0, scheduler.inflight());
        assert_eq!(0, runtime.num_pending());

        // One slot frees up in the queue, both the remaining source and a
        // drained source get a read.
        scheduler.pop_ready().unwrap();
        scheduler.top_up().unwrap();
        assert_eq!(2, scheduler.inflight());
        assert_eq!(2, runtime.num_pending());
    }

    #[test]
    fn read_failure_is_error() {
        let sources = vec![MemoryBlockSource::new([rows_block(&["a"])]).with_failure_at(0)];
        let (mut scheduler, runtime) = scheduler(sources, 1, false);

        scheduler.top_up().unwrap();
        runtime.run_all();
        let err = scheduler.wait_for_completion().unwrap_err();
        assert!(err.get_msg().contains("source 0"));
    }

    #[test]
    fn shutdown_discards_late_completions() {
        let sources = vec![MemoryBlockSource::new([rows_block(&["a"])])];
        let (mut scheduler, runtime) = scheduler(sources, 1, false);

        scheduler.top_up().unwrap();
        scheduler.shutdown();

        // Task still runs to completion, it just has nowhere to send.
        runtime.run_all();
        assert_eq!(0, runtime.num_pending());
        assert_eq!(0, scheduler.inflight());
    }

    #[test]
    fn zero_limit_rejected() {
        let runtime = Arc::new(ManualRuntime::default());
        let config = MergeConfig::default().with_inflight_limit(0);
        let result =
            InflightScheduler::try_new(Vec::new(), Arc::new(RowsetDecoder), runtime, config);
        assert!(result.is_err());
    }
}
