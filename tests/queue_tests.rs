
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use autodeploy::error::{DeployError, Result};
use autodeploy::queue::{Job, JobRunner, UpdateQueue};
use test_harness::assert_eventually;

/// Records start/end of every job and optionally waits on a gate.
#[derive(Default)]
struct RecordingRunner {
    log: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
    panic_on: Option<i64>,
    fail_on: Option<i64>,
}

impl RecordingRunner {
    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobRunner for RecordingRunner {
    async fn run(&self, job: Job) -> Result<()> {
        self.log.lock().unwrap().push(format!("start {}", job.id));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.panic_on == Some(job.id) {
            panic!("runner exploded on job {}", job.id);
        }
        self.log.lock().unwrap().push(format!("end {}", job.id));
        if self.fail_on == Some(job.id) {
            return Err(DeployError::Command {
                host: format!("host-{}", job.id),
                exit_code: Some(1),
                output: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

fn spawn_worker(
    queue: &UpdateQueue,
    rx: tokio::sync::mpsc::Receiver<Job>,
    runner: Arc<RecordingRunner>,
) -> tokio::task::JoinHandle<()> {
    let queue = queue.clone();
    tokio::spawn(async move { queue.work(rx, runner).await })
}

#[tokio::test]
async fn test_jobs_run_in_fifo_order_one_at_a_time() {
    let (queue, rx) = UpdateQueue::new(10);
    let runner = Arc::new(RecordingRunner::default());

    for id in 1..=5 {
        queue.enqueue(Job::host(id, 1)).await.unwrap();
    }
    let _worker = spawn_worker(&queue, rx, runner.clone());

    assert_eventually(
        || async { queue.size() == 0 },
        Duration::from_secs(5),
        "queue should drain",
    )
    .await;

    let expected: Vec<String> = (1..=5)
        .flat_map(|id| [format!("start {}", id), format!("end {}", id)])
        .collect();
    assert_eq!(runner.log(), expected);
}

#[tokio::test]
async fn test_size_counts_in_flight_job() {
    let (queue, rx) = UpdateQueue::new(10);
    let gate = Arc::new(Notify::new());
    let runner = Arc::new(RecordingRunner {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let _worker = spawn_worker(&queue, rx, runner.clone());

    queue.enqueue(Job::host(1, 1)).await.unwrap();
    queue.enqueue(Job::host(2, 1)).await.unwrap();
    assert_eq!(queue.size(), 2);

    assert_eventually(
        || async { runner.log() == vec!["start 1".to_string()] },
        Duration::from_secs(5),
        "first job should start",
    )
    .await;
    // Dequeued but still running.
    assert_eq!(queue.size(), 2);

    gate.notify_one();
    assert_eventually(
        || async { runner.log().len() == 3 },
        Duration::from_secs(5),
        "second job should start",
    )
    .await;
    assert_eq!(queue.size(), 1);

    gate.notify_one();
    assert_eventually(
        || async { queue.size() == 0 },
        Duration::from_secs(5),
        "queue should drain",
    )
    .await;
}

#[tokio::test]
async fn test_failing_and_panicking_jobs_do_not_stop_worker() {
    let (queue, rx) = UpdateQueue::new(10);
    let runner = Arc::new(RecordingRunner {
        panic_on: Some(2),
        fail_on: Some(3),
        ..Default::default()
    });
    let _worker = spawn_worker(&queue, rx, runner.clone());

    for id in 1..=4 {
        queue.enqueue(Job::host(id, 1)).await.unwrap();
    }

    assert_eventually(
        || async { queue.size() == 0 },
        Duration::from_secs(5),
        "queue should drain past failures",
    )
    .await;

    let log = runner.log();
    assert!(log.contains(&"start 2".to_string()));
    assert!(!log.contains(&"end 2".to_string()));
    assert!(log.contains(&"end 3".to_string()));
    assert!(log.contains(&"end 4".to_string()));
}

#[tokio::test]
async fn test_try_enqueue_reports_full_queue() {
    let (queue, _rx) = UpdateQueue::new(2);

    queue.try_enqueue(Job::host(1, 1)).unwrap();
    queue.try_enqueue(Job::host(2, 1)).unwrap();
    let err = queue.try_enqueue(Job::host(3, 1)).unwrap_err();

    assert!(matches!(err, DeployError::QueueFull));
    assert_eq!(queue.size(), 2);
    assert_eq!(queue.capacity(), 2);
}

#[tokio::test]
async fn test_enqueue_waits_for_space() {
    let (queue, rx) = UpdateQueue::new(1);
    queue.enqueue(Job::host(1, 1)).await.unwrap();

    let blocked = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.enqueue(Job::host(2, 1)).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());
    // A blocked producer already counts as outstanding work.
    assert_eq!(queue.size(), 2);

    let runner = Arc::new(RecordingRunner::default());
    let _worker = spawn_worker(&queue, rx, runner.clone());

    blocked.await.unwrap().unwrap();
    assert_eventually(
        || async { queue.size() == 0 },
        Duration::from_secs(5),
        "queue should drain",
    )
    .await;
    assert_eq!(runner.log().len(), 4);
}

#[tokio::test]
async fn test_enqueue_after_receiver_dropped() {
    let (queue, rx) = UpdateQueue::new(4);
    drop(rx);

    let err = queue.enqueue(Job::host(1, 1)).await.unwrap_err();
    assert!(matches!(err, DeployError::QueueClosed));
    assert!(matches!(
        queue.try_enqueue(Job::host(2, 1)),
        Err(DeployError::QueueClosed)
    ));
    assert_eq!(queue.size(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_drain_waits_for_outstanding_jobs() {
    let (queue, rx) = UpdateQueue::new(10);
    let runner = Arc::new(RecordingRunner::default());

    for id in 1..=3 {
        queue.enqueue(Job::host(id, 1)).await.unwrap();
    }
    let _worker = spawn_worker(&queue, rx, runner.clone());

    queue.drain(Duration::from_millis(500)).await;

    assert_eq!(queue.size(), 0);
    assert_eq!(runner.log().len(), 6);
}

#[tokio::test]
async fn test_drain_on_empty_queue_returns_immediately() {
    let (queue, _rx) = UpdateQueue::new(10);
    tokio::time::timeout(Duration::from_secs(1), queue.drain(Duration::from_millis(500)))
        .await
        .expect("drain should not wait on an empty queue");
}

#[tokio::test]
async fn test_abandoned_enqueue_releases_its_slot() {
    let (queue, rx) = UpdateQueue::new(1);
    queue.enqueue(Job::host(1, 1)).await.unwrap();

    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        queue.enqueue(Job::host(2, 1)),
    )
    .await;
    assert!(blocked.is_err());
    assert_eq!(queue.size(), 1);

    let runner = Arc::new(RecordingRunner::default());
    let _worker = spawn_worker(&queue, rx, runner.clone());

    assert_eventually(
        || async { queue.size() == 0 },
        Duration::from_secs(2),
        "abandoned enqueue should not stay counted",
    )
    .await;
    assert_eq!(runner.log(), vec!["start 1", "end 1"]);

    tokio::time::timeout(
        Duration::from_secs(2),
        queue.drain(Duration::from_millis(20)),
    )
    .await
    .expect("drain should not wait on an abandoned producer");
}
