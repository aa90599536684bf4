//! Confirms the dedup store never exceeds its configured bound no matter
//! how many keys are marked processed (testable property I4).

use notifier_core::MAX_DEDUP_EVENTS;
use notifier_state::{DedupStore, JsonFileDedupStore};

#[tokio::test]
async fn size_never_exceeds_bound() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileDedupStore::open(dir.path().join("state.json"));

    // Push well past the bound; pruning must keep us under it throughout.
    for i in 0..(MAX_DEDUP_EVENTS + MAX_DEDUP_EVENTS / 10) {
        store.mark_processed(&format!("subject:method:{i}")).await;
        assert!(store.size().await <= MAX_DEDUP_EVENTS);
    }
}
