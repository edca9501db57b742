//! Integration tests for the priority task queue.
//!
//! Most run on the default current-thread test runtime, which is the
//! cooperative single-thread model the queue is designed around. The
//! multi-thread cases pin down what still holds across workers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use conflux_queue::{TaskError, TaskQueue, TaskState};

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}

/// Submit a task that stays running until the returned sender fires.
fn gated(
    queue: &TaskQueue,
    priority: i64,
) -> (
    conflux_queue::TaskHandle<&'static str, ()>,
    conflux_queue::CancelHandle,
    oneshot::Sender<()>,
) {
    let (tx, rx) = oneshot::channel::<()>();
    let (handle, cancel) = queue.submit(
        move || async move {
            let _ = rx.await;
            Ok("released")
        },
        priority,
    );
    (handle, cancel, tx)
}

#[tokio::test]
async fn equal_priorities_run_fifo() {
    let queue = TaskQueue::new(1).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let order = Arc::clone(&order);
            let (handle, _cancel) = queue.submit(
                move || async move {
                    order.lock().unwrap().push(i);
                    Ok::<_, ()>(i)
                },
                0,
            );
            handle
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await, Ok(i));
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn highest_priority_runs_first() {
    let queue = TaskQueue::new(1).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = [0i64, 1, 2]
        .into_iter()
        .map(|priority| {
            let order = Arc::clone(&order);
            let (handle, _cancel) = queue.submit(
                move || async move {
                    order.lock().unwrap().push(priority);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, ()>(())
                },
                priority,
            );
            handle
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
}

#[tokio::test]
async fn saturated_queue_admits_new_highest_priority_next() {
    let queue = TaskQueue::new(1).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let (blocker, _blocker_cancel, release) = gated(&queue, 0);
    wait_until(|| queue.running() == 1).await;

    let mut handles = Vec::new();
    for priority in [1i64, 2, 3, 3] {
        let order = Arc::clone(&order);
        let (handle, _cancel) = queue.submit(
            move || async move {
                order.lock().unwrap().push(priority);
                Ok::<_, ()>(())
            },
            priority,
        );
        handles.push(handle);
    }
    assert_eq!(queue.pending(), 4);

    release.send(()).unwrap();
    assert_eq!(blocker.await, Ok("released"));
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![3, 3, 2, 1]);
}

#[tokio::test]
async fn running_never_exceeds_concurrency() {
    let queue = TaskQueue::new(3).unwrap();
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..20u64)
        .map(|i| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            let observer = queue.clone();
            let (handle, _cancel) = queue.submit(
                move || async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    assert!(observer.running() <= 3);
                    assert_eq!(observer.pending(), observer.len() - observer.running());
                    tokio::time::sleep(Duration::from_millis(1 + i % 4)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ()>(i)
                },
                (i % 3) as i64,
            );
            handle
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(peak.load(Ordering::SeqCst), 3);

    wait_until(|| queue.is_empty()).await;
    let stats = queue.stats();
    assert_eq!(stats.submitted, 20);
    assert_eq!(stats.completed, 20);
    assert_eq!(stats.peak_running, 3);
    assert_eq!(stats.running, 0);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn cancel_before_start_succeeds_once() {
    let queue = TaskQueue::new(2).unwrap();
    let invoked = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&invoked);
    let (handle, cancel) = queue.submit(
        move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(())
        },
        0,
    );

    // Same turn as submit: the slot is free but dispatch hasn't run yet.
    assert_eq!(cancel.state(), Some(TaskState::Pending));
    assert!(cancel.cancel());
    assert!(!cancel.cancel());
    assert_eq!(cancel.state(), Some(TaskState::Cancelled));

    assert_eq!(handle.await, Err(TaskError::Cancelled));
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(queue.stats().cancelled, 1);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn cancel_running_task_returns_false() {
    let queue = TaskQueue::new(1).unwrap();
    let (handle, cancel, release) = gated(&queue, 0);

    wait_until(|| queue.running() == 1).await;
    assert_eq!(cancel.state(), Some(TaskState::Running));
    assert!(!cancel.cancel());

    release.send(()).unwrap();
    assert_eq!(handle.await, Ok("released"));
    assert!(!cancel.cancel());
    assert_eq!(cancel.state(), None);
}

#[tokio::test]
async fn cancel_all_pending_leaves_running_alone() {
    let queue = TaskQueue::new(1).unwrap();
    let (blocker, blocker_cancel, release) = gated(&queue, 0);
    wait_until(|| queue.running() == 1).await;

    let (waiting, cancels): (Vec<_>, Vec<_>) = (0..3)
        .map(|i| queue.submit(move || async move { Ok::<_, ()>(i) }, 10))
        .unzip();
    assert_eq!(queue.pending(), 3);

    assert_eq!(queue.cancel_all_pending(), 3);
    assert_eq!(queue.pending(), 0);
    for cancel in &cancels {
        assert_eq!(cancel.state(), Some(TaskState::Cancelled));
        assert!(!cancel.cancel());
    }
    assert_eq!(blocker_cancel.state(), Some(TaskState::Running));
    assert_eq!(queue.running(), 1);
    assert_eq!(queue.cancel_all_pending(), 0);

    release.send(()).unwrap();
    assert_eq!(blocker.await, Ok("released"));
    for handle in waiting {
        assert_eq!(handle.await, Err(TaskError::Cancelled));
    }
}

#[tokio::test]
async fn unbounded_queue_starts_everything() {
    let queue = TaskQueue::unbounded();
    let mut gates = Vec::new();
    let mut handles = Vec::new();

    for _ in 0..5 {
        let (handle, cancel, release) = gated(&queue, 0);
        assert!(!cancel.cancel(), "nothing is ever pending when unbounded");
        gates.push(release);
        handles.push(handle);
    }
    assert_eq!(queue.running(), 5);
    assert_eq!(queue.pending(), 0);
    assert_eq!(queue.cancel_all_pending(), 0);

    for release in gates {
        release.send(()).unwrap();
    }
    for handle in handles {
        assert_eq!(handle.await, Ok("released"));
    }
}

#[tokio::test]
async fn failing_work_only_fails_its_own_handle() {
    let queue = TaskQueue::new(1).unwrap();

    let (bad, _) = queue.submit(|| async { Err::<u32, _>("disk full") }, 0);
    let (good, _) = queue.submit(|| async { Ok::<u32, &str>(42) }, 0);

    assert_eq!(bad.await, Err(TaskError::Failed("disk full")));
    assert_eq!(good.await, Ok(42));

    wait_until(|| queue.is_empty()).await;
    let stats = queue.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn panicking_work_releases_its_slot() {
    let queue = TaskQueue::new(1).unwrap();

    let (boom, _) = queue.submit(
        || async {
            if true {
                panic!("transform blew up");
            }
            Ok::<u32, ()>(0)
        },
        0,
    );
    let (after, _) = queue.submit(|| async { Ok::<u32, ()>(1) }, 0);

    assert_eq!(boom.await, Err(TaskError::Panicked("transform blew up".into())));
    assert_eq!(after.await, Ok(1));

    wait_until(|| queue.is_empty()).await;
    assert_eq!(queue.stats().panicked, 1);
}

#[tokio::test]
async fn clones_share_one_queue() {
    let queue = TaskQueue::new(1).unwrap();
    let other = queue.clone();
    assert!(queue.same_queue(&other));
    assert!(!queue.same_queue(&TaskQueue::new(1).unwrap()));

    let (_blocker, _cancel, release) = gated(&queue, 0);
    let (_waiting, _cancel2, _release2) = gated(&other, 0);
    assert_eq!(queue.len(), 2);

    wait_until(|| other.running() == 1).await;
    assert_eq!(other.pending(), 1);
    drop(release);
}

#[tokio::test]
async fn cancel_wins_over_a_free_slot_without_yielding() {
    let queue = TaskQueue::new(1).unwrap();
    let invoked = Arc::new(AtomicUsize::new(0));

    for _ in 0..2_000 {
        let counter = Arc::clone(&invoked);
        let (handle, cancel) = queue.submit(
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(())
            },
            0,
        );
        for i in 0..200u32 {
            std::hint::black_box(i);
        }
        assert!(cancel.cancel());
        assert_eq!(handle.await, Err(TaskError::Cancelled));
    }

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(queue.stats().cancelled, 2_000);
}

// Across worker threads a cancel may lose the race to dispatch, but its
// answer always matches what happened to the work.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_result_matches_execution_across_workers() {
    let queue = TaskQueue::new(1).unwrap();
    let invoked = Arc::new(AtomicUsize::new(0));
    let mut won = 0u64;

    for _ in 0..2_000 {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let total = Arc::clone(&invoked);
        let (handle, cancel) = queue.submit(
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                total.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(())
            },
            0,
        );
        for i in 0..200u32 {
            std::hint::black_box(i);
        }
        if cancel.cancel() {
            won += 1;
            assert_eq!(handle.await, Err(TaskError::Cancelled));
            assert_eq!(ran.load(Ordering::SeqCst), 0);
            assert_eq!(cancel.state(), Some(TaskState::Cancelled));
        } else {
            assert_eq!(handle.await, Ok(()));
            assert_eq!(ran.load(Ordering::SeqCst), 1);
        }
        assert!(queue.running() <= 1);
    }

    let stats = queue.stats();
    assert_eq!(stats.cancelled, won);
    assert_eq!(stats.completed + stats.cancelled, 2_000);
    assert_eq!(invoked.load(Ordering::SeqCst) as u64, 2_000 - won);
}

// A dedicated current-thread runtime keeps the cancel-before-start
// guarantee even when the caller itself lives on a multi-thread runtime.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn current_thread_runtime_keeps_cancel_before_start() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invoked);

    let lost = tokio::task::spawn_blocking(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let queue = TaskQueue::new(1).unwrap();
            let mut lost = 0;
            for _ in 0..2_000 {
                let counter = Arc::clone(&counter);
                let (handle, cancel) = queue.submit(
                    move || async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, ()>(())
                    },
                    0,
                );
                for i in 0..200u32 {
                    std::hint::black_box(i);
                }
                if !cancel.cancel() {
                    lost += 1;
                }
                let _ = handle.await;
            }
            lost
        })
    })
    .await
    .unwrap();

    assert_eq!(lost, 0);
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}
