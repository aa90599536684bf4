//! Covers the stop-at-current boundary predicate (testable property B5)
//! without requiring a live broker.

use notifier_consumer::partition_reached;

#[test]
fn stop_at_current_reaches_exactly_at_watermark_minus_one() {
    let high_watermark = 42;
    assert!(!partition_reached(40, high_watermark));
    assert!(partition_reached(41, high_watermark));
    assert!(partition_reached(42, high_watermark));
}
