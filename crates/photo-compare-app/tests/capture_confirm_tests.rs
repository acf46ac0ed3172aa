//! Integration tests for capture preview, confirmation and discard.

mod common;

use common::{Harness, HarnessOptions, manifest_json, test_config};
use futures::executor::block_on;
use photo_compare_app::view::ViewModel;
use photo_compare_app::{CaptureOutcome, WidgetError};
use photo_compare_config::WidgetConfig;
use photo_compare_core::SlotKey;
use photo_compare_encoder::EncodeError;
use photo_compare_flow::View;
use uuid::Uuid;

fn framing_salon() -> Harness {
    let harness = Harness::loaded();
    block_on(harness.widget.select_piece("salon")).expect("piece opens");
    harness
}

#[test]
fn capture_confirm_tests_preview_waits_for_confirmation() {
    let harness = framing_salon();
    let slot = SlotKey::new("salon", 0);

    let outcome = block_on(harness.widget.capture()).expect("capture succeeds");

    assert_eq!(outcome, CaptureOutcome::AwaitingConfirmation(slot.clone()));
    let previews = harness.port.payloads("photo.capture.preview");
    assert_eq!(previews.len(), 1);
    assert_eq!(previews[0]["pieceId"], "salon");
    assert_eq!(previews[0]["referenceIndex"], 0);
    assert!(
        previews[0]["dataUrl"]
            .as_str()
            .is_some_and(|url| url.starts_with("data:image/jpeg;base64,"))
    );
    assert!(harness.port.payloads("photo.capture.confirmed").is_empty());
    assert_eq!(harness.widget.current_view(), Some(View::Capture(slot)));
    assert!(matches!(
        harness.view.last(),
        Some(ViewModel::Capture { preview: Some(_), .. })
    ));
}

#[test]
fn capture_confirm_tests_confirmation_sends_id_and_timestamp() {
    let harness = framing_salon();

    let outcome = block_on(async {
        harness.widget.capture().await.expect("capture succeeds");
        harness.widget.confirm_capture().await.expect("confirm succeeds")
    });

    let CaptureOutcome::Confirmed {
        slot,
        capture_id,
        view,
    } = outcome
    else {
        panic!("expected a confirmed capture");
    };
    assert_eq!(slot, SlotKey::new("salon", 0));
    assert_eq!(view, View::Capture(SlotKey::new("salon", 1)));
    assert!(Uuid::parse_str(&capture_id).is_ok());

    let confirmed = harness.port.payloads("photo.capture.confirmed");
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0]["captureId"], capture_id.as_str());
    assert_eq!(confirmed[0]["takenAt"], "2023-11-14T22:13:20.123Z");
    assert_eq!(confirmed[0]["meta"]["width"], 64);
    assert_eq!(confirmed[0]["meta"]["height"], 48);
    assert!(harness.widget.captured(&slot).is_some());
}

#[test]
fn capture_confirm_tests_capture_ids_are_unique() {
    let harness = framing_salon();

    let ids: Vec<String> = block_on(async {
        let mut ids = Vec::new();
        for _ in 0..3 {
            if let CaptureOutcome::Confirmed { capture_id, .. } = common::shoot(&harness.widget).await {
                ids.push(capture_id);
            }
        }
        ids
    });

    assert_eq!(ids.len(), 3);
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
    assert_ne!(ids[0], ids[2]);
}

#[test]
fn capture_confirm_tests_second_capture_of_pending_slot_is_refused() {
    let harness = framing_salon();

    let second = block_on(async {
        harness.widget.capture().await.expect("first capture");
        harness.widget.capture().await
    });

    assert!(matches!(
        second,
        Err(WidgetError::Capture(EncodeError::SlotPending(_)))
    ));
    assert_eq!(harness.port.payloads("photo.capture.preview").len(), 1);
    assert!(harness.port.error_codes().is_empty());
}

#[test]
fn capture_confirm_tests_discard_allows_a_new_capture() {
    let harness = framing_salon();

    block_on(harness.widget.capture()).expect("first capture");
    harness.widget.discard_capture().expect("discard");

    assert!(matches!(
        harness.widget.discard_capture(),
        Err(WidgetError::NoPendingCapture)
    ));
    assert!(matches!(
        block_on(harness.widget.confirm_capture()),
        Err(WidgetError::NoPendingCapture)
    ));
    assert!(block_on(harness.widget.capture()).is_ok());
    assert_eq!(harness.port.payloads("photo.capture.preview").len(), 2);
}

#[test]
fn capture_confirm_tests_navigation_drops_pending_capture() {
    let harness = framing_salon();

    block_on(async {
        harness.widget.capture().await.expect("capture");
        harness.widget.back().await.expect("back");
    });

    assert!(matches!(
        block_on(harness.widget.confirm_capture()),
        Err(WidgetError::NoPendingCapture)
    ));
    assert!(harness.port.payloads("photo.capture.confirmed").is_empty());
}

#[test]
fn capture_confirm_tests_capture_outside_framing_is_refused() {
    let harness = Harness::loaded();

    let result = block_on(harness.widget.capture());

    assert!(matches!(result, Err(WidgetError::NoCaptureTarget)));
    assert!(harness.port.error_codes().is_empty());
}

#[test]
fn capture_confirm_tests_auto_confirm_skips_preview() {
    let harness = Harness::build(HarnessOptions {
        config: WidgetConfig {
            auto_confirm: true,
            ..test_config()
        },
        ..HarnessOptions::default()
    });
    harness.provide(manifest_json());

    let outcome = block_on(async {
        harness.widget.select_piece("cuisine").await.expect("piece opens");
        harness.widget.capture().await.expect("capture")
    });

    assert!(matches!(
        outcome,
        CaptureOutcome::Confirmed { view: View::PhotoList(ref piece), .. } if piece == "cuisine"
    ));
    assert!(harness.port.payloads("photo.capture.preview").is_empty());
    assert_eq!(harness.port.payloads("photo.capture.confirmed").len(), 1);
}
