//! Property-based tests for resolution negotiation and backend ordering
//!
//! Run with: cargo test --test negotiation_props

use picamstream::backend::Backend;
use picamstream::negotiate::{negotiate, within_tolerance};
use picamstream::selection::select_and_open;
use picamstream::testing::ScriptedBackend;
use picamstream::types::{CaptureConfig, Resolution};
use proptest::prelude::*;
use std::sync::Arc;

fn ladder_request() -> impl Strategy<Value = (u32, u32)> {
    prop_oneof![Just((1920, 1080)), Just((1280, 720)), Just((640, 480))]
}

#[test]
fn clamped_720p_camera_settles_on_720p() {
    let cam = ScriptedBackend::new("cam", 0).clamp_to(1280, 720);
    let mut handle = cam.open(&CaptureConfig::new(1920, 1080, 30)).unwrap();
    let candidates = CaptureConfig::new(1920, 1080, 30).resolution_candidates();

    let mode = negotiate(handle.as_mut(), &candidates, 30).unwrap();

    assert_eq!(mode.label, "720p");
    assert_eq!(mode.resolution, Resolution::new(1280, 720));
    assert_eq!(
        cam.probed_resolutions(),
        vec![Resolution::new(1920, 1080), Resolution::new(1280, 720)]
    );
}

#[test]
fn rounding_within_tolerance_is_accepted() {
    // 1080 rounded down to 1072 by a driver that wants multiples of 16.
    assert!(within_tolerance(
        Resolution::new(1920, 1080),
        Resolution::new(1920, 1072)
    ));
    assert!(!within_tolerance(
        Resolution::new(1920, 1080),
        Resolution::new(1280, 1080)
    ));
}

proptest! {
    /// INVARIANT: the first candidate the camera can honour within 90% wins,
    /// and nothing after it is probed
    #[test]
    fn first_fit_stops_at_first_acceptable(
        (req_w, req_h) in ladder_request(),
        max_w in 320u32..2200,
        max_h in 240u32..1300,
    ) {
        let config = CaptureConfig::new(req_w, req_h, 30);
        let candidates = config.resolution_candidates();
        let cam = ScriptedBackend::new("cam", 0).clamp_to(max_w, max_h);
        let mut handle = cam.open(&config).unwrap();

        let expected = candidates.iter().position(|c| {
            let r = c.resolution;
            within_tolerance(r, Resolution::new(r.width.min(max_w), r.height.min(max_h)))
        });

        let result = negotiate(handle.as_mut(), &candidates, 30);
        let probed = cam.probed_resolutions();

        match expected {
            Some(idx) => {
                let mode = result.unwrap();
                prop_assert_eq!(&mode.label, &candidates[idx].label);
                prop_assert_eq!(probed.len(), idx + 1);
            }
            None => {
                prop_assert!(result.is_err());
                prop_assert_eq!(probed.len(), candidates.len());
            }
        }
    }

    /// INVARIANT: accepted sizes are always at least 90% of the request
    #[test]
    fn tolerance_is_ninety_percent(
        w in 1u32..4000,
        h in 1u32..3000,
        aw in 1u32..4000,
        ah in 1u32..3000,
    ) {
        let ok = within_tolerance(Resolution::new(w, h), Resolution::new(aw, ah));
        let expected = aw as u64 * 10 >= w as u64 * 9 && ah as u64 * 10 >= h as u64 * 9;
        prop_assert_eq!(ok, expected);
    }

    /// INVARIANT: selection opens the available backend with the lowest
    /// priority value and never probes anything ranked after it
    #[test]
    fn selection_respects_priority_and_availability(
        availability in proptest::collection::vec(any::<bool>(), 1..6),
    ) {
        const IDS: [&str; 6] = ["b0", "b1", "b2", "b3", "b4", "b5"];
        let cams: Vec<ScriptedBackend> = availability
            .iter()
            .enumerate()
            .map(|(i, up)| {
                let cam = ScriptedBackend::new(IDS[i], i as u8);
                if *up { cam } else { cam.unavailable() }
            })
            .collect();
        // Register in reverse to make sure order comes from priority.
        let table: Vec<Arc<dyn Backend>> = cams
            .iter()
            .rev()
            .map(|c| Arc::new(c.clone()) as Arc<dyn Backend>)
            .collect();

        let result = select_and_open(&table, &CaptureConfig::default());

        match availability.iter().position(|up| *up) {
            Some(winner) => {
                prop_assert_eq!(result.unwrap().descriptor.id, IDS[winner]);
                for (i, cam) in cams.iter().enumerate() {
                    prop_assert_eq!(cam.probes(), u32::from(i <= winner));
                    prop_assert_eq!(cam.opens(), u32::from(i == winner));
                }
            }
            None => {
                let err = result.unwrap_err();
                prop_assert_eq!(err.attempts().len(), availability.len());
            }
        }
    }
}
