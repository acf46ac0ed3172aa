//! Exposes the workspace `VERSION` file to the crate as `PHOTO_COMPARE_VERSION`.

use std::path::Path;

fn main() {
    let version_path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../VERSION");
    println!("cargo:rerun-if-changed={}", version_path.display());

    let version = match std::fs::read_to_string(&version_path) {
        Ok(raw) => raw.trim().to_string(),
        Err(error) => panic!("cannot read {}: {error}", version_path.display()),
    };
    if version.is_empty() || version.contains(char::is_whitespace) {
        panic!("VERSION must hold a single non-empty token, got {version:?}");
    }

    println!("cargo:rustc-env=PHOTO_COMPARE_VERSION={version}");
}
