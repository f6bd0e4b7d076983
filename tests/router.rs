use eventide::{
    AfterShutdown, HandlerError, Router, RouterConfig, RouterState, SubmitError, WaitStrategy,
    handler_fn,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

type Seen = Arc<Mutex<Vec<(usize, u32)>>>;

fn recording_router(config: RouterConfig) -> (Router<(usize, u32)>, Seen) {
    let seen: Seen = Arc::default();
    let sink = seen.clone();
    let router = Router::start(
        config,
        Arc::new(handler_fn("record", move |event: &(usize, u32)| {
            sink.lock().unwrap().push(*event);
            Ok(())
        })),
    )
    .unwrap();
    (router, seen)
}

fn assert_per_producer_order(seen: &[(usize, u32)], producers: usize, per_producer: u32) {
    let mut last: HashMap<usize, u32> = HashMap::new();
    for &(producer, seq) in seen {
        if let Some(previous) = last.insert(producer, seq) {
            assert!(
                seq > previous,
                "producer {producer} delivered {seq} after {previous}"
            );
        }
    }

    assert_eq!(seen.len(), producers * per_producer as usize);
    for producer in 0..producers {
        assert_eq!(last.get(&producer), Some(&(per_producer - 1)));
    }
}

async fn run_producers(router: &Router<(usize, u32)>, producers: usize, per_producer: u32) {
    let tasks: Vec<_> = (0..producers)
        .map(|producer| {
            let router = router.clone();
            tokio::spawn(async move {
                for seq in 0..per_producer {
                    router.submit((producer, seq)).await.unwrap();
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multi_producer_order_with_every_wait_strategy() {
    for strategy in [
        WaitStrategy::Blocking,
        WaitStrategy::Yielding,
        WaitStrategy::BusySpin,
    ] {
        let (router, seen) = recording_router(
            RouterConfig::default()
                .with_buffer_size(64)
                .with_wait_strategy(strategy),
        );

        timeout(Duration::from_secs(10), run_producers(&router, 4, 500))
            .await
            .unwrap_or_else(|_| panic!("{strategy:?}: producers stalled"));
        let report = router.shutdown().await;

        assert!(report.is_complete(), "{strategy:?}: {report:?}");
        assert_eq!(report.processed, 2000);
        assert_per_producer_order(&seen.lock().unwrap(), 4, 500);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tiny_buffer_applies_backpressure_without_deadlock() {
    let (router, seen) = recording_router(RouterConfig::default().with_buffer_size(2));
    assert_eq!(router.capacity(), 2);

    timeout(Duration::from_secs(10), run_producers(&router, 3, 300))
        .await
        .expect("producers should only wait for room, never deadlock");

    let report = router.shutdown().await;
    assert_eq!(report.processed, 900);
    assert_per_producer_order(&seen.lock().unwrap(), 3, 300);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_submit_from_threads() {
    let (router, seen) = recording_router(RouterConfig::default().with_buffer_size(8));

    let threads: Vec<_> = (0..3)
        .map(|producer| {
            let router = router.clone();
            std::thread::spawn(move || {
                for seq in 0..100 {
                    router.blocking_submit((producer, seq)).unwrap();
                }
            })
        })
        .collect();

    for thread in threads {
        tokio::task::spawn_blocking(move || thread.join().unwrap())
            .await
            .unwrap();
    }

    router.shutdown().await;
    assert_per_producer_order(&seen.lock().unwrap(), 3, 100);
}

#[tokio::test]
async fn test_graceful_shutdown_delivers_every_accepted_event() {
    let (router, seen) = recording_router(
        RouterConfig::default()
            .with_buffer_size(1024)
            .with_after_shutdown(AfterShutdown::Reject),
    );

    for seq in 0..1000 {
        router.submit((0, seq)).await.unwrap();
    }
    let report = router.shutdown().await;

    assert!(report.is_complete());
    assert_eq!(report.processed, 1000);
    assert_eq!(seen.lock().unwrap().len(), 1000);
    assert_eq!(router.state(), RouterState::Stopped);

    let late = router.submit((0, 1000)).await;
    assert!(matches!(late, Err(SubmitError::ShuttingDown((0, 1000)))));
}

#[tokio::test]
async fn test_failing_events_do_not_block_the_rest() {
    let router = Router::start(
        RouterConfig::default(),
        Arc::new(handler_fn("odd-fails", |n: &u32| {
            if n % 2 == 1 {
                Err(HandlerError::failed(format!("{n} is odd")))
            } else {
                Ok(())
            }
        })),
    )
    .unwrap();

    for n in 0..10 {
        router.submit(n).await.unwrap();
    }
    let report = router.shutdown().await;

    assert_eq!(report.processed, 5);
    assert_eq!(report.failed, 5);
    assert!(report.is_complete());
}
