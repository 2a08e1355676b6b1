//! Basic cothread example
//!
//! Spawns a few tasks on one hub. They sleep, yield, hand work over a
//! queue and wait on a gate, then the main task joins them.
//!
//! # Environment Variables
//!
//! - `COT_LOG=debug` - Log filter (`tracing_subscriber::EnvFilter` syntax)
//! - `COT_READY_BATCH`, `COT_PARK_TIMEOUT_MS` - Hub tuning, see `HubConfig`

use cothread::{sleep, spawn_named, yield_now, BlockingQueue, Gate, Hub, HubConfig, SchedError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// COT_LOG=debug cargo run -p cothread-basic
fn main() -> Result<(), SchedError> {
    cothread::init_logging();
    println!("=== cothread Basic Example ===\n");

    let hub = Hub::new(HubConfig::from_env())?;
    let start = Instant::now();

    let total = hub.block_on(async {
        let jobs = BlockingQueue::new();
        let go = Gate::new();

        let mut workers = Vec::new();
        for i in 1..=3u64 {
            let (jobs, go) = (jobs.clone(), go.clone());
            workers.push(spawn_named(format!("worker-{i}"), async move {
                if let Err(e) = worker(i, jobs, go).await {
                    warn!(worker = i, error = %e, "worker stopped early");
                }
            }));
        }

        for n in 1..=9 {
            jobs.put(n);
        }
        info!(workers = workers.len(), "releasing workers");
        go.set();

        for task in &workers {
            task.join(None).await?;
            debug!(task = %task.name(), state = ?task.state(), "joined");
        }
        Ok::<_, SchedError>((1..=9).sum::<u64>())
    })?;

    println!("processed {total}ms of work in {:?}", start.elapsed());
    println!("\n=== Example Complete ===");
    Ok(())
}

/// Wait for the start signal, then take jobs until the queue stays empty
async fn worker(i: u64, jobs: BlockingQueue<u64>, go: Gate) -> Result<(), SchedError> {
    go.wait(None).await?;
    let mut sum = 0u64;
    while let Ok(n) = jobs.get(Some(Duration::from_millis(20))).await {
        debug!(worker = i, job = n, "picked up job");
        sleep(Duration::from_millis(n)).await?;
        sum += n;
        yield_now().await?;
    }
    info!(worker = i, sum, "queue drained");
    Ok(())
}
