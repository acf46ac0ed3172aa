#![warn(missing_docs)]
//! # photo-compare-app binary
//!
//! Native manifest checker: `photo-compare-app <manifest.json>` validates a
//! manifest file the way the widget does and prints one line per piece.

/// CLI entry point.
fn main() {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(error) = cli::run(std::env::args().skip(1).collect()) {
            eprintln!("photo-compare-app: {error}");
            std::process::exit(1);
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
mod cli {
    //! Argument handling and manifest summary output.

    use std::fs;

    use photo_compare_app::{app_version, summarize_manifest};
    use photo_compare_manifest::parse_manifest;
    use tracing_subscriber::EnvFilter;

    const USAGE: &str = "usage: photo-compare-app <manifest.json>";

    pub fn run(args: Vec<String>) -> Result<(), String> {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .init();

        let path = match args.as_slice() {
            [flag] if flag == "--version" || flag == "-V" => {
                println!("photo-compare-app {}", app_version());
                return Ok(());
            }
            [path] => path,
            _ => return Err(USAGE.to_string()),
        };

        let raw = fs::read_to_string(path).map_err(|error| format!("{path}: {error}"))?;
        let manifest = parse_manifest(&raw).map_err(|error| format!("{path}: {error}"))?;
        tracing::info!(stage = "cli", action = "validated", path = %path);

        println!(
            "logement {} | rapport {} | {} piece(s) | {} reference(s)",
            manifest.logement_id(),
            manifest.rapport_id(),
            manifest.pieces().len(),
            manifest.total_references()
        );
        for line in summarize_manifest(&manifest) {
            println!("{line}");
        }
        Ok(())
    }
}
