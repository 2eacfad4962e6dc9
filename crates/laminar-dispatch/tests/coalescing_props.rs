//! Property tests for delta merging and round coalescing.

use std::sync::Arc;

use proptest::prelude::*;

use laminar_dispatch::testing::{MockStatement, RecordingView};
use laminar_dispatch::{DeltaRecord, DispatchConfig, DispatchService, LatchConfig, WindowTail};

fn arb_delta() -> impl Strategy<Value = DeltaRecord<u32>> {
    (
        prop::collection::vec(0u32..1000, 0..6),
        prop::collection::vec(0u32..1000, 0..6),
    )
        .prop_map(|(inserted, removed)| DeltaRecord::new(inserted, removed))
}

fn concat(deltas: &[DeltaRecord<u32>]) -> (Vec<u32>, Vec<u32>) {
    let inserted = deltas.iter().flat_map(|d| d.inserted().to_vec()).collect();
    let removed = deltas.iter().flat_map(|d| d.removed().to_vec()).collect();
    (inserted, removed)
}

proptest! {
    /// Merging is associative.
    #[test]
    fn merge_associative(a in arb_delta(), b in arb_delta(), c in arb_delta()) {
        prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
    }

    /// The empty delta is a two-sided identity.
    #[test]
    fn merge_identity(a in arb_delta()) {
        let empty = DeltaRecord::default();
        prop_assert_eq!(&a.merge(&empty), &a);
        prop_assert_eq!(&empty.merge(&a), &a);
    }

    /// A round of N tickets for one consumer delivers the concatenation of
    /// the per-ticket sequences, in arrival order, as a single update.
    #[test]
    fn round_delivers_concatenation(deltas in prop::collection::vec(arb_delta(), 1..12)) {
        let service = Arc::new(DispatchService::new(DispatchConfig::default()));
        let mut worker = service.worker::<u32>();
        let config = service.config();
        let tail = WindowTail::<u32>::new("w", LatchConfig::default(), config);
        let view = RecordingView::<u32>::new();
        tail.add_consumer(MockStatement::new(1, "s1"), view.clone());

        let mut published = Vec::new();
        for delta in &deltas {
            if tail.publish(&worker.queue(), delta.clone()) {
                published.push(delta.clone());
            }
        }
        worker.dispatch().unwrap();

        let updates = view.updates();
        if published.is_empty() {
            prop_assert!(updates.is_empty());
        } else {
            prop_assert_eq!(updates.len(), 1);
            prop_assert_eq!(&updates[0], &concat(&published));
        }
    }

    /// Coalescing never mixes consumers: each view sees exactly the
    /// deltas routed to it.
    #[test]
    fn round_keeps_consumers_apart(
        routed in prop::collection::vec((any::<bool>(), arb_delta()), 2..10)
    ) {
        let service = Arc::new(DispatchService::new(DispatchConfig::default()));
        let mut worker = service.worker::<u32>();
        let stmt = MockStatement::new(1, "s1");
        let config = service.config();
        let left = WindowTail::<u32>::new("left", LatchConfig::default(), config);
        let right = WindowTail::<u32>::new("right", LatchConfig::default(), config);
        let left_view = RecordingView::<u32>::new();
        let right_view = RecordingView::<u32>::new();
        left.add_consumer(stmt.clone(), left_view.clone());
        right.add_consumer(stmt.clone(), right_view.clone());

        let (mut to_left, mut to_right) = (Vec::new(), Vec::new());
        for (goes_left, delta) in &routed {
            let (tail, sent) = if *goes_left { (&left, &mut to_left) } else { (&right, &mut to_right) };
            if tail.publish(&worker.queue(), delta.clone()) {
                sent.push(delta.clone());
            }
        }
        worker.dispatch().unwrap();

        prop_assert_eq!(concat_updates(&left_view), concat(&to_left));
        prop_assert_eq!(concat_updates(&right_view), concat(&to_right));
        prop_assert!(stmt.internal_dispatch_count() <= 1);
    }
}

fn concat_updates(view: &RecordingView<u32>) -> (Vec<u32>, Vec<u32>) {
    (view.inserted(), view.removed())
}
