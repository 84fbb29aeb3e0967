use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tickflow::{ExecutorThread, Promise, PromiseCombiner, TaskQueue};

fn wait_until(deadline: Duration, cond: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[test]
fn continuations_run_on_the_executor_thread() {
    let queue = TaskQueue::new();
    let _executor = ExecutorThread::with_queue(&queue);

    let promise = Promise::<u32>::create();
    let observed = Arc::new(Mutex::new(None));
    {
        let observed = Arc::clone(&observed);
        promise.on_success(
            move |v| *observed.lock() = Some((*v, thread::current().id())),
            &queue,
        );
    }

    promise.resolve(7);
    assert!(wait_until(Duration::from_secs(2), || observed.lock().is_some()));

    let (value, worker) = observed.lock().take().unwrap();
    assert_eq!(value, 7);
    assert_ne!(worker, thread::current().id());
}

#[test]
fn resolution_from_another_thread_reaches_waiting_continuations() {
    let queue = TaskQueue::new();
    let _executor = ExecutorThread::with_queue(&queue);

    let promise = Promise::<String>::create();
    let chained = promise.then(|s| s.len(), &queue);

    let resolver = {
        let promise = Arc::clone(&promise);
        thread::spawn(move || promise.resolve("resolved off-thread".to_string()))
    };
    resolver.join().unwrap();

    assert!(wait_until(Duration::from_secs(2), || chained.is_finished()));
    assert_eq!(*chained.sync_get(), 19);
}

#[test]
fn combiner_joins_promises_resolved_from_multiple_threads() {
    let queue = TaskQueue::new();
    let _executor = ExecutorThread::with_queue(&queue);

    let first = Promise::<u32>::create();
    let second = Promise::<String>::create();

    let combiner = PromiseCombiner::create();
    let first_key = combiner.add(&first, &queue);
    let second_key = combiner.add(&second, &queue);
    let combined = combiner.combine();

    let observed = Arc::new(Mutex::new(None));
    {
        let observed = Arc::clone(&observed);
        combined.on_success(
            move |bundle| {
                *observed.lock() = Some((*bundle.get(first_key), bundle.get(second_key).clone()));
            },
            &queue,
        );
    }

    let resolvers = [
        {
            let first = Arc::clone(&first);
            thread::spawn(move || first.resolve(42))
        },
        {
            let second = Arc::clone(&second);
            thread::spawn(move || second.resolve("both".to_string()))
        },
    ];
    for handle in resolvers {
        handle.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || observed.lock().is_some()));
    assert_eq!(
        observed.lock().take().unwrap(),
        (42, "both".to_string())
    );
}

#[test]
fn consume_fires_exactly_once_under_concurrent_resolution() {
    let queue = TaskQueue::new();
    let _executor = ExecutorThread::with_queue(&queue);

    let promise = Promise::<u32>::create();
    let consumed = Arc::new(Mutex::new(Vec::new()));
    {
        let consumed = Arc::clone(&consumed);
        promise.consume(move |v| consumed.lock().push(v), &queue);
    }

    // Racing resolvers; exactly one wins, the rest are no-ops.
    let racers: Vec<_> = (0..4)
        .map(|i| {
            let promise = Arc::clone(&promise);
            thread::spawn(move || promise.resolve(i))
        })
        .collect();
    for handle in racers {
        handle.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || !consumed.lock().is_empty()));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(consumed.lock().len(), 1);
}
