#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMetrics {
    /// Number of reads completed for this source, including the terminal
    /// read.
    pub reads: usize,

    /// Number of control blocks discarded.
    pub skipped_blocks: usize,

    /// Number of blocks containing rows.
    pub data_blocks: usize,

    /// Number of rows handed to the consumer.
    pub rows_emitted: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeMetrics {
    /// Metrics for each source, indexed by source index.
    pub sources: Vec<SourceMetrics>,

    /// Highest number of reads we've had outstanding at once.
    pub peak_inflight: usize,

    /// Number of times the consumer had to wait for a read to complete.
    pub waits: usize,
}

impl MergeMetrics {
    pub fn new(num_sources: usize) -> Self {
        MergeMetrics {
            sources: vec![SourceMetrics::default(); num_sources],
            peak_inflight: 0,
            waits: 0,
        }
    }

    pub fn total_rows(&self) -> u64 {
        self.sources.iter().map(|s| s.rows_emitted).sum()
    }

    pub fn total_reads(&self) -> usize {
        self.sources.iter().map(|s| s.reads).sum()
    }
}
