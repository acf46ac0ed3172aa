//! Validates contract fixtures and widget wire output against frozen JSON schemas.

use jsonschema::JSONSchema;
use photo_compare_bridge::{
    CaptureConfirmedPayload, CapturePreviewPayload, DataRequestPayload, InboundMessage,
    OutboundMessage, PieceSelectedPayload, ReadyPayload,
};
use photo_compare_core::{CaptureMeta, ErrorCode};
use photo_compare_manifest::parse_manifest_value;
use serde_json::{Value, json};

fn load_json(path: &str) -> Value {
    let raw = std::fs::read_to_string(path).expect("json file should be readable");
    serde_json::from_str(&raw).expect("json file should be valid")
}

fn compile_validator(schema_path: &str) -> JSONSchema {
    let schema = load_json(schema_path);
    JSONSchema::compile(&schema).expect("schema should compile")
}

fn outbound_validator() -> JSONSchema {
    compile_validator(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../contracts/outbound-message.schema.json"
    ))
}

fn fixture_items(path: &str) -> Vec<Value> {
    match load_json(path) {
        Value::Array(items) => items,
        other => vec![other],
    }
}

#[test]
fn manifest_fixture_matches_schema() {
    let validator = compile_validator(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../contracts/manifest.schema.json"
    ));
    let fixture = load_json(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../contracts/fixtures/manifest.valid.json"
    ));
    assert!(
        validator.is_valid(&fixture),
        "manifest fixture should validate against schema"
    );

    let manifest = parse_manifest_value(fixture).expect("fixture should parse as a manifest");
    assert_eq!(manifest.total_references(), 3);
}

#[test]
fn manifest_schema_and_parser_agree_on_empty_pictures() {
    let validator = compile_validator(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../contracts/manifest.schema.json"
    ));
    let invalid = json!({
        "logement_id": "log-42",
        "rapport_id": "rap-7",
        "pieces": [{ "piece_id": "salon", "nom": "Salon", "checkin_pictures": [] }]
    });

    assert!(!validator.is_valid(&invalid));
    assert!(parse_manifest_value(invalid).is_err());
}

#[test]
fn inbound_fixture_matches_schema_and_decodes() {
    let validator = compile_validator(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../contracts/inbound-message.schema.json"
    ));
    for message in fixture_items(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../contracts/fixtures/inbound-message.valid.json"
    )) {
        assert!(
            validator.is_valid(&message),
            "inbound fixture should validate against schema: {message}"
        );
        serde_json::from_value::<InboundMessage>(message).expect("fixture should decode");
    }
}

#[test]
fn outbound_fixture_matches_schema_and_decodes() {
    let validator = outbound_validator();
    for message in fixture_items(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../contracts/fixtures/outbound-message.valid.json"
    )) {
        assert!(
            validator.is_valid(&message),
            "outbound fixture should validate against schema: {message}"
        );
        serde_json::from_value::<OutboundMessage>(message).expect("fixture should decode");
    }
}

#[test]
fn serialized_outbound_messages_match_schema() {
    let validator = outbound_validator();
    let meta = CaptureMeta {
        width: 48,
        height: 64,
    };
    let messages = [
        OutboundMessage::Ready(ReadyPayload {
            version: "0.1.0".to_string(),
            rapport_id: Some("rap-7".to_string()),
            logement_id: None,
        }),
        OutboundMessage::DataRequest(DataRequestPayload::default()),
        OutboundMessage::PieceSelected(PieceSelectedPayload {
            piece_id: "salon".to_string(),
            nom: "Salon".to_string(),
        }),
        OutboundMessage::CapturePreview(CapturePreviewPayload {
            piece_id: "salon".to_string(),
            reference_index: 0,
            data_url: "data:image/jpeg;base64,/9j/4A==".to_string(),
            meta,
        }),
        OutboundMessage::CaptureConfirmed(CaptureConfirmedPayload {
            piece_id: "salon".to_string(),
            reference_index: 0,
            capture_id: "0b6f3c1e-2a4d-4e8f-9a1b-7c2d3e4f5a6b".to_string(),
            taken_at: "2023-11-14T22:13:20.123Z".to_string(),
            data_url: "data:image/jpeg;base64,/9j/4A==".to_string(),
            meta,
        }),
        OutboundMessage::error(
            ErrorCode::CaptureFailed,
            "no video frame available",
            json!({ "pieceId": "salon", "referenceIndex": 0 }),
        ),
    ];

    for message in messages {
        let value = serde_json::to_value(&message).expect("message should serialize");
        assert!(
            validator.is_valid(&value),
            "{} should validate against schema: {value}",
            message.kind()
        );
    }
}
