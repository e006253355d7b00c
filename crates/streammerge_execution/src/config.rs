use streammerge_error::{Result, StreamMergeError};

/// Largest inflight limit a config may carry.
pub const MAX_INFLIGHT_LIMIT: usize = 65536;

/// Configuration for a single merged scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeConfig {
    /// Max number of reads that may be outstanding at once. Also bounds the
    /// number of decoded payloads waiting to be consumed.
    pub inflight_limit: usize,

    /// Move the round-robin cursor back to a source when its read completes,
    /// if that source comes before the cursor.
    ///
    /// Only changes the order sources are visited in. Completeness and
    /// per-source ordering hold either way.
    pub rewind_on_completion: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            inflight_limit: num_cpus::get(),
            rewind_on_completion: false,
        }
    }
}

impl MergeConfig {
    pub fn with_inflight_limit(mut self, inflight_limit: usize) -> Self {
        self.inflight_limit = inflight_limit;
        self
    }

    pub fn with_rewind_on_completion(mut self, rewind: bool) -> Self {
        self.rewind_on_completion = rewind;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.inflight_limit == 0 {
            return Err(StreamMergeError::new("Inflight limit must be at least 1"));
        }
        if self.inflight_limit > MAX_INFLIGHT_LIMIT {
            return Err(StreamMergeError::new(format!(
                "Inflight limit {} exceeds max of {MAX_INFLIGHT_LIMIT}",
                self.inflight_limit
            )));
        }
        Ok(())
    }
}
