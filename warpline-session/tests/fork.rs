use std::sync::Arc;

use warpline_core::{SessionStore, Step, StepQuery};
use warpline_session::{fork_session, truncate_from, InMemorySessionStore};

async fn seed(store: &InMemorySessionStore, session_id: &str, count: u64) {
    for seq in 1..=count {
        store
            .save_step(&Step::user(session_id, "r1", seq, format!("m{seq}")))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn fork_copies_prefix_and_preserves_sequences() {
    let store = Arc::new(InMemorySessionStore::new());
    seed(&store, "orig", 10).await;

    let forked = fork_session(store.as_ref(), "orig", 5).await.unwrap();

    let copied = store.get_steps(&forked, &StepQuery::default()).await.unwrap();
    assert_eq!(copied.len(), 5);
    assert_eq!(
        copied.iter().map(|s| s.sequence).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );
}

#[tokio::test]
async fn forked_session_continues_independently() {
    let store = Arc::new(InMemorySessionStore::new());
    seed(&store, "orig", 10).await;
    let forked = fork_session(store.as_ref(), "orig", 5).await.unwrap();

    // Continue the fork: allocation resumes after the copied tail.
    let next = store.allocate_sequence(&forked).await.unwrap();
    assert_eq!(next, 6);
    store
        .save_step(&Step::user(&forked, "r2", next, "forked continuation"))
        .await
        .unwrap();

    let original = store.get_steps("orig", &StepQuery::default()).await.unwrap();
    assert_eq!(original.len(), 10, "original untouched");
    let forked_steps = store.get_steps(&forked, &StepQuery::default()).await.unwrap();
    assert_eq!(forked_steps.len(), 6);
}

#[tokio::test]
async fn fork_of_missing_range_fails() {
    let store = Arc::new(InMemorySessionStore::new());
    let error = fork_session(store.as_ref(), "nope", 5).await.unwrap_err();
    assert!(matches!(error, warpline_core::WarplineError::NotFound(_)));
}

#[tokio::test]
async fn truncate_deletes_from_sequence() {
    let store = Arc::new(InMemorySessionStore::new());
    seed(&store, "s", 10).await;

    let removed = truncate_from(store.as_ref(), "s", 7).await.unwrap();
    assert_eq!(removed, 4);

    let rest = store.get_steps("s", &StepQuery::default()).await.unwrap();
    assert_eq!(rest.last().unwrap().sequence, 6);

    // Allocation continues after the new tail, not the old one.
    assert_eq!(store.allocate_sequence("s").await.unwrap(), 7);
}
