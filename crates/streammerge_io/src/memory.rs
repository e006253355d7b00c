use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use std::collections::VecDeque;
use streammerge_error::{Result, StreamMergeError};
use tracing::trace;

use crate::BlockSource;

/// Source that yields a fixed list of blocks.
///
/// Once the list is drained every subsequent read returns an empty block, so
/// the stream always terminates even if the list has no explicit end block.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockSource {
    blocks: VecDeque<Bytes>,

    /// Fail the read at this position instead of returning a block.
    fail_at: Option<usize>,

    /// Number of reads completed so far.
    reads: usize,
}

impl MemoryBlockSource {
    pub fn new(blocks: impl IntoIterator<Item = Bytes>) -> Self {
        MemoryBlockSource {
            blocks: blocks.into_iter().collect(),
            fail_at: None,
            reads: 0,
        }
    }

    /// Make the read at position `read_idx` (zero based) fail.
    pub fn with_failure_at(mut self, read_idx: usize) -> Self {
        self.fail_at = Some(read_idx);
        self
    }

    pub fn reads(&self) -> usize {
        self.reads
    }

    fn next_block(&mut self) -> Result<Bytes> {
        let read_idx = self.reads;
        self.reads += 1;

        if self.fail_at == Some(read_idx) {
            return Err(StreamMergeError::new(format!(
                "Injected read failure at read {read_idx}"
            )));
        }

        let block = self.blocks.pop_front().unwrap_or_default();
        trace!(%read_idx, len = block.len(), "memory source read");

        Ok(block)
    }
}

impl BlockSource for MemoryBlockSource {
    fn read(&mut self) -> BoxFuture<'_, Result<Bytes>> {
        future::ready(self.next_block()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;

    #[test]
    fn yields_blocks_then_empty() {
        let mut source =
            MemoryBlockSource::new([Bytes::from_static(b"a"), Bytes::from_static(b"bc")]);

        assert_eq!(Bytes::from_static(b"a"), block_on(source.read()).unwrap());
        assert_eq!(Bytes::from_static(b"bc"), block_on(source.read()).unwrap());
        assert!(block_on(source.read()).unwrap().is_empty());
        assert!(block_on(source.read()).unwrap().is_empty());
        assert_eq!(4, source.reads());
    }

    #[test]
    fn injected_failure() {
        let mut source = MemoryBlockSource::new([Bytes::from_static(b"a")]).with_failure_at(1);

        block_on(source.read()).unwrap();
        let err = block_on(source.read()).unwrap_err();
        assert!(err.get_msg().contains("read 1"));
    }
}
