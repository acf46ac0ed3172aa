//! Tests manifest construction invariants and slot addressing.

use photo_compare_core::{CoreError, Piece, ReferenceManifest, ReferencePhoto, SlotKey};

fn piece(piece_id: &str, references: usize) -> Piece {
    let photos = (0..references)
        .map(|index| {
            ReferencePhoto::new(format!("https://cdn.example.com/{piece_id}-{index}.jpg"))
                .expect("fixture url is valid")
        })
        .collect();
    Piece::new(piece_id, piece_id.to_uppercase(), photos).expect("fixture piece is valid")
}

#[test]
fn manifest_integrity_tests_counts_and_addresses_every_slot() {
    let manifest =
        ReferenceManifest::new("log-1", "rap-1", vec![piece("salon", 3), piece("wc", 1)])
            .expect("manifest should be valid");

    assert_eq!(manifest.total_references(), 4);
    assert_eq!(manifest.piece_index("wc"), Some(1));
    assert_eq!(manifest.reference_count("salon"), Some(3));
    assert!(manifest.contains_slot(&SlotKey::new("salon", 2)));
    assert!(!manifest.contains_slot(&SlotKey::new("salon", 3)));
    assert!(!manifest.contains_slot(&SlotKey::new("garage", 0)));
    assert_eq!(
        manifest
            .reference(&SlotKey::new("wc", 0))
            .map(ReferencePhoto::url),
        Some("https://cdn.example.com/wc-0.jpg")
    );
}

#[test]
fn manifest_integrity_tests_slots_follow_reference_order() {
    let salon = piece("salon", 3);
    let slots: Vec<String> = salon.slots().map(|slot| slot.to_string()).collect();

    assert_eq!(slots, vec!["salon:0", "salon:1", "salon:2"]);
}

#[test]
fn manifest_integrity_tests_rejects_structural_violations() {
    assert_eq!(
        ReferenceManifest::new("log-1", "rap-1", Vec::new()),
        Err(CoreError::NoPieces)
    );
    assert_eq!(
        Piece::new("salon", "Salon", Vec::new()),
        Err(CoreError::NoReferencePhotos("salon".to_string()))
    );
    let photo = ReferencePhoto::new("https://cdn.example.com/a.jpg").expect("fixture url is valid");
    assert_eq!(
        Piece::new("  ", "Blank", vec![photo]),
        Err(CoreError::EmptyPieceId)
    );
    assert!(matches!(
        ReferencePhoto::new("ftp://cdn.example.com/a.jpg"),
        Err(CoreError::InvalidReferenceUrl(_))
    ));
}
