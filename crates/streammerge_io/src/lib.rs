pub mod gauge;
pub mod memory;

use bytes::Bytes;
use futures::future::BoxFuture;
use std::fmt::Debug;
use streammerge_error::Result;

/// A remote stream of opaque blocks for a single partition.
///
/// An empty block signals end of stream. Callers must not issue another
/// `read` until the previous one completes, which the `&mut self` receiver
/// enforces.
pub trait BlockSource: Debug + Send {
    fn read(&mut self) -> BoxFuture<'_, Result<Bytes>>;
}

/// Runtime that drives outstanding reads.
///
/// The merger never spawns threads itself. Every read is handed off to the
/// runtime the transport runs on.
pub trait ReadRuntime: Debug + Sync + Send {
    fn spawn(&self, fut: BoxFuture<'static, ()>);
}
