use futures::StreamExt;
use warpline_core::{StepEvent, StepEventType, Wire};

fn event(event_type: StepEventType, run_id: &str) -> StepEvent {
    StepEvent::new(event_type, run_id)
}

#[tokio::test]
async fn reader_sees_events_then_terminates_on_close() {
    let wire = Wire::new();

    wire.write(event(StepEventType::RunStarted, "r1")).await;
    wire.write(event(StepEventType::RunCompleted, "r1")).await;
    wire.close().await;

    let events: Vec<_> = wire.read().collect().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, StepEventType::RunStarted);
    assert_eq!(events[1].event_type, StepEventType::RunCompleted);
}

#[tokio::test]
async fn writes_after_close_are_dropped() {
    let wire = Wire::new();
    wire.write(event(StepEventType::RunStarted, "r1")).await;
    wire.close().await;
    wire.write(event(StepEventType::Error, "r1")).await;
    wire.write_nowait(event(StepEventType::Error, "r1"));

    let events: Vec<_> = wire.read().collect().await;
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn close_is_idempotent() {
    let wire = Wire::new();
    wire.close().await;
    wire.close().await;
    assert!(wire.is_closed());

    let events: Vec<_> = wire.read().collect().await;
    assert!(events.is_empty());
}

#[tokio::test]
async fn second_reader_observes_termination() {
    let wire = Wire::new();
    wire.write(event(StepEventType::RunCompleted, "r1")).await;
    wire.close().await;

    let first: Vec<_> = wire.read().collect().await;
    assert_eq!(first.len(), 1);

    // The receiver half is gone; a late reader must still end, not hang.
    let second: Vec<_> = wire.read().collect().await;
    assert!(second.is_empty());
}

#[tokio::test]
async fn many_producers_one_consumer() {
    let wire = Wire::new();
    let mut handles = Vec::new();
    for producer in 0..8 {
        let wire = wire.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..25 {
                wire.write(event(StepEventType::StepDelta, &format!("run-{producer}")))
                    .await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    wire.close().await;

    let events: Vec<_> = wire.read().collect().await;
    assert_eq!(events.len(), 8 * 25);
}

#[tokio::test]
async fn bounded_wire_delivers_everything_with_active_reader() {
    let wire = Wire::bounded(4);
    let writer = {
        let wire = wire.clone();
        tokio::spawn(async move {
            for _ in 0..64 {
                wire.write(event(StepEventType::StepDelta, "r1")).await;
            }
            wire.close().await;
        })
    };

    let events: Vec<_> = wire.read().collect().await;
    writer.await.unwrap();
    assert_eq!(events.len(), 64);
}
