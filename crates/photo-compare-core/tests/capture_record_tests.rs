//! Tests captured-photo construction and wire spellings of shared types.

use photo_compare_core::{CaptureMeta, CapturedPhoto, CoreError, ErrorCode, SlotKey};

#[test]
fn capture_record_tests_rejects_empty_stills() {
    let meta = CaptureMeta {
        width: 640,
        height: 480,
    };

    assert_eq!(
        CapturedPhoto::new(Vec::new(), "data:image/jpeg;base64,".to_string(), 1, meta),
        Err(CoreError::EmptyCapture)
    );
    assert_eq!(
        CapturedPhoto::new(
            vec![0xFF, 0xD8],
            "data:image/jpeg;base64,/9g=".to_string(),
            1,
            CaptureMeta { width: 0, ..meta }
        ),
        Err(CoreError::EmptyCapture)
    );

    let photo = CapturedPhoto::new(
        vec![0xFF, 0xD8],
        "data:image/jpeg;base64,/9g=".to_string(),
        1_700_000_000_000,
        meta,
    )
    .expect("non-empty capture is valid");
    assert_eq!(photo.meta, meta);
}

#[test]
fn capture_record_tests_meta_uses_plain_dimension_fields() {
    let meta = serde_json::to_value(CaptureMeta {
        width: 1080,
        height: 1920,
    })
    .expect("meta serializes");

    assert_eq!(meta, serde_json::json!({ "width": 1080, "height": 1920 }));
}

#[test]
fn capture_record_tests_error_codes_are_screaming_snake_case() {
    let codes: Vec<&str> = [
        ErrorCode::RefLoadFailed,
        ErrorCode::CameraDenied,
        ErrorCode::NoCamerasDetected,
        ErrorCode::CameraSwitchFailed,
        ErrorCode::CaptureFailed,
        ErrorCode::RapportLoadFailed,
    ]
    .iter()
    .map(ErrorCode::as_str)
    .collect();

    assert_eq!(
        codes,
        vec![
            "REF_LOAD_FAILED",
            "CAMERA_DENIED",
            "NO_CAMERAS_DETECTED",
            "CAMERA_SWITCH_FAILED",
            "CAPTURE_FAILED",
            "RAPPORT_LOAD_FAILED",
        ]
    );
}

#[test]
fn capture_record_tests_slot_keys_round_trip_through_text() {
    let slot: SlotKey = "etage:1:chambre:2".parse().expect("slot parses");

    assert_eq!(slot, SlotKey::new("etage:1:chambre", 2));
    assert!("salon".parse::<SlotKey>().is_err());
    assert!(":0".parse::<SlotKey>().is_err());
}
