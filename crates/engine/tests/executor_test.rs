// Integration tests for the work executor
//
// Resizing, pause, abort and the exactly-once completion contract,
// exercised through the public API with real timers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use multirun_engine::executor::{
    Completion, ExecutorConfig, ExecutorEvent, ExecutorInput, ExecutorStatus, WorkExecutor,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// Drain a run's event stream until the channel closes
async fn drain<I, O>(mut events: UnboundedReceiver<ExecutorEvent<I, O>>) -> Vec<ExecutorEvent<I, O>> {
    let mut collected = Vec::new();
    while let Some(event) = events.recv().await {
        collected.push(event);
    }
    collected
}

#[derive(Debug, Default)]
struct Counts {
    results: usize,
    errors: usize,
    progress: usize,
    completed: usize,
}

fn count<I, O>(events: &[ExecutorEvent<I, O>]) -> Counts {
    let mut counts = Counts::default();
    for event in events {
        match event {
            ExecutorEvent::Result(_) => counts.results += 1,
            ExecutorEvent::Error(_) => counts.errors += 1,
            ExecutorEvent::Progress(_) => counts.progress += 1,
            ExecutorEvent::Completed(_) => counts.completed += 1,
        }
    }
    counts
}

#[test_log::test(tokio::test)]
async fn test_shrinking_never_interrupts_in_flight_work() {
    let running = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let resized = Arc::new(AtomicUsize::new(0));
    let max_after_resize = Arc::new(AtomicUsize::new(0));

    let executor = {
        let running = Arc::clone(&running);
        let finished = Arc::clone(&finished);
        let resized = Arc::clone(&resized);
        let max_after_resize = Arc::clone(&max_after_resize);
        WorkExecutor::new(ExecutorConfig::new(4), move |n: u32, _cancel| {
            let running = Arc::clone(&running);
            let finished = Arc::clone(&finished);
            let resized = Arc::clone(&resized);
            let max_after_resize = Arc::clone(&max_after_resize);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                if resized.load(Ordering::SeqCst) == 1 {
                    max_after_resize.fetch_max(now, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(150)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(n)
            }
        })
    };

    let events = executor.start(ExecutorInput::from_vec((0..10).collect())).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(executor.state().active, 4);

    executor.set_concurrency(1);
    resized.store(1, Ordering::SeqCst);

    // The four in-flight items are still running, none was killed
    let state = executor.state();
    assert_eq!(state.active, 4);
    assert_eq!(state.target, 1);
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    let events = drain(events).await;
    let counts = count(&events);
    assert_eq!(counts.results, 10);
    assert_eq!(counts.errors, 0);
    assert_eq!(finished.load(Ordering::SeqCst), 10);
    assert!(max_after_resize.load(Ordering::SeqCst) <= 1);
}

#[test_log::test(tokio::test)]
async fn test_batch_completes_for_any_concurrency() {
    const ITEMS: u64 = 50;

    for concurrency in [1, 3, 10, 50] {
        let executor =
            WorkExecutor::new(ExecutorConfig::new(concurrency), |n: u64, _cancel| async move {
                Ok(n + 1)
            });

        let events = drain(executor.start(ExecutorInput::from_vec((0..ITEMS).collect())).unwrap()).await;
        let counts = count(&events);

        assert_eq!(counts.results as u64, ITEMS, "concurrency {concurrency}");
        assert_eq!(counts.progress as u64, ITEMS, "concurrency {concurrency}");
        assert_eq!(counts.completed, 1, "concurrency {concurrency}");
        assert!(matches!(events.last(), Some(ExecutorEvent::Completed(_))));

        let summary = executor.last_summary().unwrap();
        assert_eq!(summary.completion, Completion::Finished);
        assert_eq!(summary.processed, ITEMS);
        assert_eq!(executor.state().processed, ITEMS);
    }
}

#[test_log::test(tokio::test)]
async fn test_pause_halts_progress_until_resume() {
    let executor = WorkExecutor::new(ExecutorConfig::new(2), |n: u64, _cancel| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(n)
    });

    let events = executor.start(ExecutorInput::from_vec((0..20).collect())).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    executor.pause().unwrap();
    assert_eq!(executor.status(), ExecutorStatus::Paused);

    // Let the in-flight items finish, then nothing else may start
    tokio::time::sleep(Duration::from_millis(60)).await;
    let paused_at = executor.state().processed;
    assert_eq!(executor.state().active, 0);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(executor.state().processed, paused_at);
    assert!(paused_at < 20);

    executor.resume().unwrap();
    let summary = executor.wait_completion(Duration::from_secs(5)).await.unwrap();
    assert_eq!(summary.completion, Completion::Finished);
    assert_eq!(summary.processed, 20);

    let counts = count(&drain(events).await);
    assert_eq!(counts.results, 20);
    assert_eq!(counts.completed, 1);
}

#[test_log::test(tokio::test)]
async fn test_abort_completes_early_without_errors() {
    let executor = WorkExecutor::new(ExecutorConfig::new(5), |n: u64, cancel| async move {
        tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("cancelled"),
            _ = tokio::time::sleep(Duration::from_millis(100)) => Ok(n),
        }
    });

    let started = Instant::now();
    let events = executor.start(ExecutorInput::from_vec((0..100).collect())).unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    executor.abort().unwrap();

    let summary = executor.wait_completion(Duration::from_secs(2)).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(summary.completion, Completion::Aborted);
    assert!(summary.processed < 100);
    // 100 items at 5 wide would take two seconds
    assert!(elapsed < Duration::from_secs(1), "abort took {elapsed:?}");

    let counts = count(&drain(events).await);
    assert_eq!(counts.errors, 0);
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.results as u64, summary.processed);
    assert_eq!(executor.status(), ExecutorStatus::Idle);
}

#[test_log::test(tokio::test)]
async fn test_parity_check_scenario() {
    let executor = WorkExecutor::new(ExecutorConfig::new(10), |n: u64, _cancel| async move {
        Ok(n % 2 == 0)
    });

    let events = drain(executor.start(ExecutorInput::from_vec((1..=100).collect())).unwrap()).await;
    let counts = count(&events);

    assert_eq!(counts.results, 100);
    assert_eq!(counts.progress, 100);
    assert_eq!(counts.errors, 0);
    assert_eq!(counts.completed, 1);

    let last_input = events
        .iter()
        .find_map(|e| match e {
            ExecutorEvent::Result(details) if details.input == 100 => Some(details.output),
            _ => None,
        })
        .unwrap();
    assert!(last_input);

    for event in &events {
        if let ExecutorEvent::Result(details) = event {
            assert_eq!(details.output, details.input % 2 == 0);
            assert_eq!(details.index, details.input - 1);
        }
    }
}

#[test_log::test(tokio::test)]
async fn test_resize_takes_effect_on_timing() {
    let executor = WorkExecutor::new(ExecutorConfig::new(3), |n: u64, _cancel| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(n)
    });

    let started = Instant::now();
    let events = executor.start(ExecutorInput::from_vec((0..12).collect())).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    executor.set_concurrency(1);

    let summary = executor.wait_completion(Duration::from_secs(5)).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(summary.completion, Completion::Finished);
    assert_eq!(summary.processed, 12);
    assert!(elapsed > Duration::from_millis(400), "finished in {elapsed:?}");

    let counts = count(&drain(events).await);
    assert_eq!(counts.results, 12);
    assert_eq!(counts.errors, 0);
}

#[test_log::test(tokio::test)]
async fn test_growing_releases_slots_immediately() {
    let executor = WorkExecutor::new(ExecutorConfig::new(1), |n: u64, _cancel| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(n)
    });

    let _events = executor.start(ExecutorInput::from_vec((0..8).collect())).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(executor.state().active, 1);

    executor.set_concurrency(4);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(executor.state().active, 4);

    executor.abort().unwrap();
    executor.wait_completion(Duration::from_secs(2)).await.unwrap();
}
