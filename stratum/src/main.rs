use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use stratum::{CacheConfig, CacheMetrics, MemoryBackend, TieredCache};
use tracing::info;
use tracing_subscriber::EnvFilter;

const STORE_NAME: &str = "workload";

/// Run a synthetic read-heavy workload against an in-process backend
#[derive(Parser, Debug)]
#[command(name = "stratum", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Distinct keys seeded in the backend
    #[arg(long, default_value_t = 2_000)]
    keys: usize,

    /// Operations per worker
    #[arg(long, default_value_t = 10_000)]
    operations: usize,

    /// Concurrent workers
    #[arg(long, default_value_t = 8)]
    concurrency: usize,
}

fn init_tracing(config: &CacheConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.format == "pretty" {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    }
}

/// Key index for operation `op` of `worker`: most traffic goes to a hot fifth
fn key_index(worker: usize, op: usize, keys: usize) -> usize {
    let hot = (keys / 5).max(1);
    let bucket = (worker * 31 + op * 17) % 100;
    if bucket < 80 {
        (op * 13 + worker) % hot
    } else {
        (op * 7 + worker * 3) % keys
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => CacheConfig::from_file(path)?,
        None => CacheConfig::default(),
    };
    init_tracing(&config);

    let run_id = uuid::Uuid::new_v4();
    info!(
        run_id = %run_id,
        "Starting Stratum workload v{} (keys={}, operations={}, concurrency={})",
        env!("CARGO_PKG_VERSION"),
        args.keys,
        args.operations,
        args.concurrency
    );

    let backend = MemoryBackend::new();
    let cache = TieredCache::new(config, Arc::new(backend.clone()))?;
    let keys = args.keys.max(1);

    // Seed the durable tier, then start from a cold local tier
    for i in 0..keys {
        cache
            .set_default(&format!("key:{}", i), STORE_NAME, format!("value-{}", i))
            .await?;
    }
    cache.entry_store().clear();
    cache.entry_store().stats().reset();

    cache.start();
    let started = Instant::now();

    let mut workers = Vec::with_capacity(args.concurrency);
    for worker in 0..args.concurrency {
        let cache = cache.clone();
        let operations = args.operations;
        workers.push(tokio::spawn(async move {
            for op in 0..operations {
                let id = format!("key:{}", key_index(worker, op, keys));
                if op % 10 == 0 {
                    cache
                        .set_default(&id, STORE_NAME, format!("value-{}-{}", worker, op))
                        .await?;
                } else {
                    cache.get(&id, STORE_NAME).await?;
                }
            }
            Ok::<_, stratum::CacheError>(())
        }));
    }
    for worker in workers {
        worker.await??;
    }

    let elapsed = started.elapsed();
    let stats = cache.stats();
    let capacity = cache.entry_store().capacity();
    info!(
        run_id = %run_id,
        "Workload finished in {:?}: hit_rate={:.3}, backend_gets={}",
        elapsed,
        stats.hit_rate(),
        backend.op_counts().gets
    );

    let metrics = CacheMetrics::new()?;
    metrics.observe(&stats, capacity);

    println!("{}", serde_json::to_string_pretty(&stats)?);
    match cache.tuner().run_cycle()? {
        Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
        None => println!("tuner: idle window"),
    }
    print!("{}", metrics.render()?);

    cache.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_index_in_range() {
        for worker in 0..4 {
            for op in 0..1000 {
                assert!(key_index(worker, op, 50) < 50);
                assert!(key_index(worker, op, 1) < 1);
            }
        }
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["stratum"]);
        assert!(args.config.is_none());
        assert_eq!(args.concurrency, 8);
    }
}
