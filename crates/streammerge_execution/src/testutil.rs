//! Runtimes and helpers for tests.
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use streammerge_io::ReadRuntime;

use crate::decoder::encode_rows_block;

/// Runtime that holds on to spawned reads until the test decides to run
/// them, letting tests pick the exact completion order.
#[derive(Default)]
pub struct ManualRuntime {
    tasks: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl std::fmt::Debug for ManualRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualRuntime")
            .field("pending", &self.num_pending())
            .finish()
    }
}

impl ManualRuntime {
    pub fn num_pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Run the task at `idx` in the pending list to completion.
    pub fn run_task(&self, idx: usize) {
        let task = self.tasks.lock().remove(idx);
        futures::executor::block_on(task);
    }

    /// Run all pending tasks, in spawn order.
    pub fn run_all(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            futures::executor::block_on(task);
        }
    }
}

impl ReadRuntime for ManualRuntime {
    fn spawn(&self, fut: BoxFuture<'static, ()>) {
        self.tasks.lock().push(fut);
    }
}

/// Runtime that runs every read to completion as soon as it's spawned.
#[derive(Debug, Default)]
pub struct InlineRuntime;

impl ReadRuntime for InlineRuntime {
    fn spawn(&self, fut: BoxFuture<'static, ()>) {
        futures::executor::block_on(fut);
    }
}

/// Create rows for a block, each row being `"{prefix}-{row_number}"`.
pub fn labeled_rows_block(prefix: &str, start: usize, count: usize) -> Bytes {
    let rows: Vec<String> = (start..start + count)
        .map(|n| format!("{prefix}-{n}"))
        .collect();
    encode_rows_block(rows.iter().map(|r| r.as_bytes()))
}
