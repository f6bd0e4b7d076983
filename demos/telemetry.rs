//! Forwards request telemetry from several producer tasks through one router.
//!
//! Run with `RUST_LOG=eventide=debug cargo run --example telemetry`, optionally with
//! `EVENTIDE_BUFFER_SIZE` and friends set. Press Ctrl+C to stop early.

use async_trait::async_trait;
use eventide::{EventHandler, HandlerError, Router, RouterConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Request {
    worker: usize,
    seq: u32,
    latency_ms: u64,
}

#[derive(Default)]
struct TelemetryForwarder;

#[async_trait]
impl EventHandler<Request> for TelemetryForwarder {
    fn name(&self) -> &str {
        "telemetry-forwarder"
    }

    async fn handle(&self, request: &Request) -> Result<(), HandlerError> {
        if request.latency_ms > 90 {
            return Err(HandlerError::failed(format!(
                "worker {} request {} exceeded the latency budget",
                request.worker, request.seq
            )));
        }

        tokio::time::sleep(Duration::from_millis(1)).await;
        println!("{}/{}: {}ms", request.worker, request.seq, request.latency_ms);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = RouterConfig::default()
        .with_buffer_size(100)
        .with_worker_name("telemetry")
        .with_env_overrides()?;

    let router = Router::start(config, Arc::new(TelemetryForwarder))?;
    let signals = eventide::listen_for_signals(router.clone());

    let producers: Vec<_> = (0..4)
        .map(|worker| {
            let router = router.clone();
            tokio::spawn(async move {
                for seq in 0..50u32 {
                    let latency_ms = u64::from(seq * 7 + worker as u32 * 13) % 100;
                    let request = Request {
                        worker,
                        seq,
                        latency_ms,
                    };
                    if let Err(err) = router.submit(request).await {
                        eprintln!("worker {worker}: {err}");
                        break;
                    }
                }
            })
        })
        .collect();

    for producer in producers {
        producer.await?;
    }

    let report = router.shutdown().await;
    signals.await?;

    println!(
        "processed={} failed={} abandoned={}",
        report.processed, report.failed, report.abandoned
    );
    Ok(())
}
