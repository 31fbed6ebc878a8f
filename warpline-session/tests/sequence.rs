use std::collections::HashSet;
use std::sync::Arc;

use warpline_core::{ExecutionContext, SessionStore, Wire};
use warpline_session::{InMemorySessionStore, SequenceManager};

#[tokio::test]
async fn allocation_is_monotonic_and_gap_free_under_contention() {
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let manager = SequenceManager::new(Arc::clone(&store));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let mut allocated = Vec::new();
            for _ in 0..50 {
                allocated.push(manager.allocate("s1", None).await.unwrap());
            }
            allocated
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }

    let unique: HashSet<_> = all.iter().copied().collect();
    assert_eq!(unique.len(), 16 * 50, "no duplicates");
    assert_eq!(*unique.iter().min().unwrap(), 1);
    assert_eq!(*unique.iter().max().unwrap(), 16 * 50, "no gaps");
}

#[tokio::test]
async fn sessions_have_independent_counters() {
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let manager = SequenceManager::new(store);

    assert_eq!(manager.allocate("a", None).await.unwrap(), 1);
    assert_eq!(manager.allocate("a", None).await.unwrap(), 2);
    assert_eq!(manager.allocate("b", None).await.unwrap(), 1);
}

#[tokio::test]
async fn context_reservation_takes_priority_once() {
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let manager = SequenceManager::new(store);
    let ctx = ExecutionContext::root("s1", Wire::new()).with_sequence_reservation(41);

    assert_eq!(manager.allocate("s1", Some(&ctx)).await.unwrap(), 41);
    // Reservation consumed; the next call falls back to the atomic path.
    assert_eq!(manager.allocate("s1", Some(&ctx)).await.unwrap(), 1);
}

#[tokio::test]
async fn detached_manager_returns_one() {
    let manager = SequenceManager::detached();
    assert_eq!(manager.allocate("s1", None).await.unwrap(), 1);
}
