use vitals_core::buffer::{EnqueueOutcome, QueueError, bounded};
use vitals_core::domain::SensorSample;

fn sample(ecg: i32) -> SensorSample {
    SensorSample {
        ecg,
        ..SensorSample::default()
    }
}

#[test]
fn test_samples_come_out_in_enqueue_order() {
    let (tx, mut rx) = bounded(16).unwrap();
    for ecg in 0..10 {
        assert_eq!(tx.enqueue(sample(ecg)).unwrap(), EnqueueOutcome::Enqueued);
    }

    let order: Vec<i32> = rx.drain_ready().map(|s| s.ecg).collect();
    assert_eq!(order, (0..10).collect::<Vec<_>>());
    assert!(rx.is_empty());
}

#[test]
fn test_full_queue_drops_newest() {
    let (tx, mut rx) = bounded(4).unwrap();
    for ecg in 0..6 {
        let _ = tx.enqueue(sample(ecg)).unwrap();
    }

    let metrics = tx.metrics();
    assert_eq!(metrics.pushed, 4);
    assert_eq!(metrics.dropped, 2);
    assert!((metrics.fill_ratio() - 1.0).abs() < f64::EPSILON);

    let kept: Vec<i32> = rx.drain_ready().map(|s| s.ecg).collect();
    assert_eq!(kept, vec![0, 1, 2, 3]);
    assert_eq!(rx.metrics().popped, 4);
}

#[test]
fn test_dropped_consumer_closes_queue() {
    let (tx, rx) = bounded::<SensorSample>(4).unwrap();
    drop(rx);
    assert!(tx.is_closed());
    assert_eq!(tx.enqueue(sample(1)), Err(QueueError::Closed));
}

#[tokio::test]
async fn test_recv_waits_for_producer() {
    let (tx, mut rx) = bounded(4).unwrap();
    let producer = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let _ = tx.enqueue(sample(42)).unwrap();
    });

    assert_eq!(rx.recv().await.map(|s| s.ecg), Some(42));
    producer.await.unwrap();
    // Producer gone and queue empty
    assert!(rx.recv().await.is_none());
}

#[test]
fn test_recv_wakes_on_enqueue() {
    let (tx, mut rx) = bounded(4).unwrap();
    let mut recv = tokio_test::task::spawn(rx.recv());
    tokio_test::assert_pending!(recv.poll());

    let _ = tx.enqueue(sample(7)).unwrap();
    assert!(recv.is_woken());
    let received = tokio_test::assert_ready!(recv.poll());
    assert_eq!(received.map(|s| s.ecg), Some(7));
}
