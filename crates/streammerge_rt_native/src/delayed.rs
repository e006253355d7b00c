use bytes::Bytes;
use futures::future::BoxFuture;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use streammerge_error::Result;
use streammerge_io::gauge::ReadGauge;
use streammerge_io::BlockSource;

/// How long each read should take.
#[derive(Debug, Clone)]
pub enum ReadDelay {
    None,
    Fixed(Duration),
    /// Uniformly random delay between zero and `max`.
    Random { rng: StdRng, max: Duration },
}

impl ReadDelay {
    pub fn random(seed: u64, max: Duration) -> Self {
        ReadDelay::Random {
            rng: StdRng::seed_from_u64(seed),
            max,
        }
    }

    fn next_delay(&mut self) -> Duration {
        match self {
            ReadDelay::None => Duration::ZERO,
            ReadDelay::Fixed(d) => *d,
            ReadDelay::Random { rng, max } => {
                let max_micros = max.as_micros() as u64;
                if max_micros == 0 {
                    return Duration::ZERO;
                }
                Duration::from_micros(rng.gen_range(0..=max_micros))
            }
        }
    }
}

/// Wraps a source, sleeping on the tokio timer before each read.
///
/// Reads must be driven by a tokio runtime with the time driver enabled.
#[derive(Debug)]
pub struct DelayedBlockSource<S> {
    inner: S,
    delay: ReadDelay,
    gauge: Option<ReadGauge>,
}

impl<S: BlockSource> DelayedBlockSource<S> {
    pub fn new(inner: S, delay: ReadDelay) -> Self {
        DelayedBlockSource {
            inner,
            delay,
            gauge: None,
        }
    }

    /// Record reads against a gauge while they're running.
    pub fn with_gauge(mut self, gauge: ReadGauge) -> Self {
        self.gauge = Some(gauge);
        self
    }
}

impl<S: BlockSource> BlockSource for DelayedBlockSource<S> {
    fn read(&mut self) -> BoxFuture<'_, Result<Bytes>> {
        let delay = self.delay.next_delay();
        let guard = self.gauge.as_ref().map(|g| g.enter());

        Box::pin(async move {
            let _guard = guard;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.inner.read().await
        })
    }
}
