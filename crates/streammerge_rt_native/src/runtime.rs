use std::sync::Arc;

use futures::future::BoxFuture;
use streammerge_error::{Result, ResultExt};
use streammerge_io::ReadRuntime;
use tokio::runtime::RuntimeFlavor;
use tracing::{debug, warn};

/// Read runtime backed by tokio.
///
/// May either own its tokio runtime, or borrow a handle to a runtime that
/// the transport already runs on.
#[derive(Debug)]
pub struct NativeReadRuntime {
    /// Runtime we own, if any. Kept around so it's not shut down while
    /// reads are still being spawned on it.
    tokio: Option<Arc<tokio::runtime::Runtime>>,

    /// Handle reads get spawned on.
    handle: tokio::runtime::Handle,
}

impl NativeReadRuntime {
    /// Create a runtime with a default multi-threaded tokio runtime.
    pub fn try_new() -> Result<Self> {
        Self::try_new_with_worker_threads(2)
    }

    pub fn try_new_with_worker_threads(worker_threads: usize) -> Result<Self> {
        let tokio = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .enable_time()
            .thread_name("streammerge_tokio")
            .build()
            .context("Failed to build tokio runtime")?;
        let handle = tokio.handle().clone();
        debug!(%worker_threads, "built tokio runtime for reads");

        Ok(NativeReadRuntime {
            tokio: Some(Arc::new(tokio)),
            handle,
        })
    }

    /// Spawn reads onto an existing tokio runtime.
    ///
    /// The merger blocks its thread while waiting on reads, so the runtime
    /// must make progress without that thread. Use a multi-thread runtime,
    /// or a current-thread runtime that some other thread is driving.
    /// Otherwise `Merger::advance` never returns.
    pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
        if handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
            warn!("reads spawned on a current-thread runtime, it must be driven by another thread");
        }
        NativeReadRuntime {
            tokio: None,
            handle,
        }
    }

    pub fn handle(&self) -> &tokio::runtime::Handle {
        &self.handle
    }

    /// If this runtime owns the underlying tokio runtime.
    pub fn is_owned(&self) -> bool {
        self.tokio.is_some()
    }
}

impl ReadRuntime for NativeReadRuntime {
    fn spawn(&self, fut: BoxFuture<'static, ()>) {
        // Reads report back through the completion channel, nothing to do
        // with the join handle.
        let _ = self.handle.spawn(fut);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn spawned_future_runs() {
        let runtime = NativeReadRuntime::try_new().unwrap();
        assert!(runtime.is_owned());

        let (tx, rx) = mpsc::channel();
        runtime.spawn(Box::pin(async move {
            tx.send(42).unwrap();
        }));

        assert_eq!(42, rx.recv().unwrap());
    }

    #[test]
    fn from_existing_handle() {
        let tokio = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let runtime = NativeReadRuntime::from_handle(tokio.handle().clone());
        assert!(!runtime.is_owned());

        let (tx, rx) = futures::channel::oneshot::channel();
        runtime.spawn(Box::pin(async move {
            let _ = tx.send(7);
        }));

        assert_eq!(7, tokio.block_on(rx).unwrap());
    }

    #[test]
    fn from_multi_thread_handle_progresses_while_caller_blocks() {
        let tokio = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let runtime = NativeReadRuntime::from_handle(tokio.handle().clone());

        let (tx, rx) = mpsc::channel();
        runtime.spawn(Box::pin(async move {
            tx.send(9).unwrap();
        }));

        // Nothing drives the runtime from this thread.
        assert_eq!(9, rx.recv().unwrap());
    }
}
