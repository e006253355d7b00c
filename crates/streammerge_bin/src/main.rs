use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use clap::Parser;
use logutil::LogFormat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use streammerge_error::{Result, StreamMergeError};
use streammerge_execution::config::MergeConfig;
use streammerge_execution::decoder::{encode_control_block, RowsetBlockBuilder};
use streammerge_execution::merger::Merger;
use streammerge_io::gauge::ReadGauge;
use streammerge_io::memory::MemoryBlockSource;
use streammerge_io::BlockSource;
use streammerge_rt_native::delayed::{DelayedBlockSource, ReadDelay};
use streammerge_rt_native::NativeReadRuntime;
use tracing::info;

/// Run a merged scan over synthetic sources and check the output.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Arguments {
    /// Number of sources to read from.
    #[arg(long, default_value_t = 8)]
    sources: usize,

    /// Max number of data blocks per source.
    #[arg(long, default_value_t = 16)]
    max_blocks: usize,

    /// Max number of rows per data block.
    #[arg(long, default_value_t = 64)]
    max_rows: usize,

    /// Max number of outstanding reads. Defaults to the number of cpus.
    #[arg(long)]
    inflight_limit: Option<usize>,

    /// Rewind the round-robin cursor to sources as their reads complete.
    #[arg(long)]
    rewind_on_completion: bool,

    /// Max simulated latency per read, in milliseconds.
    #[arg(long, default_value_t = 2)]
    max_delay_ms: u64,

    /// Seed for generating sources and delays.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Number of tokio worker threads driving reads.
    #[arg(long, default_value_t = 2)]
    worker_threads: usize,

    /// Log output format (json, human, compact).
    #[arg(long, default_value = "human")]
    log_format: LogFormat,
}

/// Generated blocks for a single source, along with how many rows it holds.
struct GeneratedSource {
    blocks: Vec<Bytes>,
    num_rows: u64,
}

fn main() {
    let args = Arguments::parse();
    logutil::configure_global_logger(tracing::Level::INFO, args.log_format);

    if let Err(e) = inner(args) {
        println!("----");
        println!("ERROR");
        println!("{e}");
        std::process::exit(1);
    }
}

fn inner(args: Arguments) -> Result<()> {
    let mut config = MergeConfig::default().with_rewind_on_completion(args.rewind_on_completion);
    if let Some(limit) = args.inflight_limit {
        config = config.with_inflight_limit(limit);
    }
    config.validate()?;

    let runtime = Arc::new(NativeReadRuntime::try_new_with_worker_threads(
        args.worker_threads,
    )?);

    let mut rng = StdRng::seed_from_u64(args.seed);
    let generated: Vec<_> = (0..args.sources)
        .map(|idx| generate_source(&mut rng, idx, args.max_blocks, args.max_rows))
        .collect();

    let gauge = ReadGauge::new();
    let max_delay = Duration::from_millis(args.max_delay_ms);
    let sources: Vec<Box<dyn BlockSource>> = generated
        .iter()
        .enumerate()
        .map(|(idx, g)| {
            let inner = MemoryBlockSource::new(g.blocks.clone());
            let delay = ReadDelay::random(args.seed ^ (idx as u64 + 1), max_delay);
            Box::new(DelayedBlockSource::new(inner, delay).with_gauge(gauge.clone()))
                as Box<dyn BlockSource>
        })
        .collect();

    info!(
        sources = %args.sources,
        inflight_limit = %config.inflight_limit,
        rewind = %config.rewind_on_completion,
        "starting scan"
    );

    let start = Instant::now();
    let mut merger = Merger::try_new(sources, runtime, config)?;

    let boundaries = Arc::new(AtomicU64::new(0));
    let hook_boundaries = boundaries.clone();
    merger.on_block_boundary(move |_| {
        hook_boundaries.fetch_add(1, Ordering::Relaxed);
    });

    let mut expected_next = vec![1_u64; args.sources];
    while merger.advance()? {
        let pos = merger
            .position()
            .ok_or_else(|| StreamMergeError::new("Valid merger missing position"))?;
        if pos.record_index != expected_next[pos.source] {
            return Err(StreamMergeError::new(format!(
                "Out of order row for source {}: expected record {}, got {}",
                pos.source, expected_next[pos.source], pos.record_index
            )));
        }
        expected_next[pos.source] += 1;
    }
    let block_boundaries = boundaries.load(Ordering::Relaxed);

    for (idx, g) in generated.iter().enumerate() {
        let emitted = expected_next[idx] - 1;
        if emitted != g.num_rows {
            return Err(StreamMergeError::new(format!(
                "Source {idx} emitted {emitted} rows, expected {}",
                g.num_rows
            )));
        }
    }

    let elapsed = start.elapsed();
    let metrics = merger.metrics();

    println!("sources:          {}", args.sources);
    println!("rows:             {}", metrics.total_rows());
    println!("reads:            {}", metrics.total_reads());
    println!("blocks bound:     {block_boundaries}");
    println!("peak inflight:    {}", metrics.peak_inflight);
    println!("peak reads:       {}", gauge.peak());
    println!("consumer waits:   {}", metrics.waits);
    println!("elapsed:          {elapsed:?}");

    Ok(())
}

fn generate_source(
    rng: &mut StdRng,
    source: usize,
    max_blocks: usize,
    max_rows: usize,
) -> GeneratedSource {
    let mut blocks = Vec::new();
    let mut num_rows = 0;

    let num_blocks = rng.gen_range(0..=max_blocks);
    for block in 0..num_blocks {
        if rng.gen_bool(0.1) {
            blocks.push(encode_control_block(b"progress"));
        }

        let rows = rng.gen_range(1..=max_rows.max(1));
        let mut builder = RowsetBlockBuilder::new();
        for row in 0..rows {
            builder.push_row(format!("{source}:{block}:{row}").as_bytes());
        }
        num_rows += builder.num_rows() as u64;
        blocks.push(builder.finish());
    }

    GeneratedSource { blocks, num_rows }
}
