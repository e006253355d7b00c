use futures::channel::mpsc;
use futures::{FutureExt, SinkExt, StreamExt};
use std::collections::VecDeque;
use streammerge_error::Result;
use streammerge_io::BlockSource;

use crate::decoder::{DecodedBlock, Payload};

/// Message sent by a read task once its read finishes.
///
/// Ownership of the source travels with the read. A source that's out on a
/// read can't be read again until its completion is received, so there's
/// never more than one outstanding read per source.
#[derive(Debug)]
pub struct Completion {
    pub source_idx: usize,
    pub source: Box<dyn BlockSource>,
    pub outcome: Result<DecodedBlock>,
}

/// A decoded payload waiting to be bound to the row cursor.
#[derive(Debug)]
pub struct PendingResult {
    pub source_idx: usize,
    pub payload: Payload,
}

/// Create the sending and receiving ends of a result queue.
///
/// The channel is sized to `capacity`. The scheduler never has more than
/// `capacity` reads outstanding, and every read sends exactly one
/// completion, so sends never wait on a full channel.
pub fn result_queue(capacity: usize) -> (CompletionSender, ResultQueue) {
    let (sender, receiver) = mpsc::channel(capacity);
    (
        CompletionSender { sender },
        ResultQueue {
            receiver,
            ready: VecDeque::new(),
        },
    )
}

#[derive(Debug, Clone)]
pub struct CompletionSender {
    sender: mpsc::Sender<Completion>,
}

impl CompletionSender {
    /// Send a completion to the consumer.
    ///
    /// Returns false if the receiving side is gone, which happens once the
    /// merger has been finished or dropped. The completion is discarded in
    /// that case.
    pub async fn send(&mut self, completion: Completion) -> bool {
        self.sender.send(completion).await.is_ok()
    }
}

/// Receiving side of the completion channel along with the FIFO of decoded
/// payloads that haven't been consumed yet.
///
/// Waiting on the channel is the only place the consumer ever blocks. Any
/// number of completions arriving before the consumer gets around to
/// waiting are simply buffered in the channel, so there's no lost wakeup to
/// guard against.
#[derive(Debug)]
pub struct ResultQueue {
    receiver: mpsc::Receiver<Completion>,
    ready: VecDeque<PendingResult>,
}

impl ResultQueue {
    /// Try to get a completion without blocking.
    pub fn try_recv(&mut self) -> Option<Completion> {
        // Receiver can't be closed since the scheduler holds a sender, so
        // the inner option is always Some if ready.
        self.receiver.next().now_or_never().flatten()
    }

    /// Block the current thread until the next completion arrives.
    ///
    /// Must not be called from within an async context.
    pub fn recv_blocking(&mut self) -> Option<Completion> {
        futures::executor::block_on(self.receiver.next())
    }

    pub fn push(&mut self, result: PendingResult) {
        self.ready.push_back(result);
    }

    pub fn pop_front(&mut self) -> Option<PendingResult> {
        self.ready.pop_front()
    }

    /// Number of decoded payloads waiting to be consumed.
    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    /// Drop all buffered payloads and stop accepting completions.
    ///
    /// Read tasks still in flight will find the channel closed and discard
    /// their results.
    pub fn close(&mut self) {
        self.ready.clear();
        self.receiver.close();
    }
}
