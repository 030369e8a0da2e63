//! Property-based tests for the feature codec.

#![allow(clippy::disallowed_methods)]

use proptest::prelude::*;
use std::collections::BTreeSet;
use touch_scorer::features::{FeatureCodec, GestureMap, RawRecord, FEATURE_DIM};
use touch_scorer::ScorerError;

/// Strategy for a label map with distinct, well-separated codes
fn gesture_map() -> impl Strategy<Value = Vec<(String, f64)>> {
    (prop::collection::btree_set("[A-Z]{1,8}", 1..8), -100i32..100).prop_map(
        |(labels, offset): (BTreeSet<String>, i32)| {
            labels
                .into_iter()
                .enumerate()
                .map(|(i, label)| (label, f64::from(offset) + i as f64))
                .collect()
        },
    )
}

proptest! {
    /// Property: decode(encode(l)) == l for every label in the map
    #[test]
    fn label_round_trip(entries in gesture_map(), m in prop::array::uniform9(-1e3..1e3f64)) {
        let codec = FeatureCodec::new(GestureMap::new(entries.clone()).unwrap());
        for (label, _) in &entries {
            let features = codec.encode(&RawRecord::new(label.as_str(), m)).unwrap();
            prop_assert_eq!(features.as_slice().len(), FEATURE_DIM);
            prop_assert_eq!(&features.as_slice()[1..], &m[..]);
            prop_assert_eq!(codec.decode(features.as_slice()[0], 1e-6).unwrap(), label.as_str());
        }
    }

    /// Property: labels outside the map never encode without a default
    #[test]
    fn unknown_label_rejected(entries in gesture_map(), label in "[a-z]{1,8}") {
        let codec = FeatureCodec::new(GestureMap::new(entries).unwrap());
        let record = RawRecord::new(label, [0.0; 9]);
        let is_unknown = matches!(codec.encode(&record), Err(ScorerError::UnknownLabel { .. }));
        prop_assert!(is_unknown);
        let with_default = codec.encode_or(&record, Some(-1.0)).unwrap();
        prop_assert_eq!(with_default.as_slice()[0], -1.0);
    }

    /// Property: a second label reusing an existing code is rejected
    #[test]
    fn shared_code_rejected(entries in gesture_map(), pick in any::<prop::sample::Index>()) {
        let (_, code) = entries[pick.index(entries.len())].clone();
        let mut entries = entries;
        entries.push(("shared".to_string(), code));
        let is_invalid = matches!(GestureMap::new(entries), Err(ScorerError::InvalidMapping { .. }));
        prop_assert!(is_invalid);
    }

    /// Property: codes further than tol from every entry do not decode
    #[test]
    fn far_codes_do_not_decode(entries in gesture_map()) {
        let codec = FeatureCodec::new(GestureMap::new(entries).unwrap());
        let is_no_match = matches!(codec.decode(0.5e6, 1e-6), Err(ScorerError::NoMatch { .. }));
        prop_assert!(is_no_match);
    }
}
