//! Integration tests for launch query parsing and manifest source selection.

use photo_compare_config::{ConfigError, Environment, LaunchParams, ManifestSourceSpec, WidgetConfig};

#[test]
fn launch_params_tests_reads_embedding_page_url() {
    let params = LaunchParams::from_page_url(
        "https://widget.example.com/index.html?token=t-1&rapport_id=rap-7&logement_id=log-42&env=test&auto_load=yes",
    )
    .expect("page url parses");

    assert_eq!(params.token.as_ref().map(|token| token.as_str()), Some("t-1"));
    assert_eq!(params.rapport_id.as_deref(), Some("rap-7"));
    assert_eq!(params.logement_id.as_deref(), Some("log-42"));
    assert_eq!(params.env, Environment::Test);
    assert!(params.auto_load);
    assert_eq!(params.manifest_source(), ManifestSourceSpec::Parent);
}

#[test]
fn launch_params_tests_data_url_wins_over_data_file() {
    let params = LaunchParams::from_query(
        "?data_file=demo.json&data_url=https%3A%2F%2Fcdn.example.test%2Fm.json",
    )
    .expect("query parses");

    assert!(matches!(
        params.manifest_source(),
        ManifestSourceSpec::Url(url) if url.as_str() == "https://cdn.example.test/m.json"
    ));
}

#[test]
fn launch_params_tests_defaults_to_live_without_auto_load() {
    let params =
        LaunchParams::from_query("rapport_id=rap-7&auto_load=0&token=").expect("query parses");

    assert_eq!(params.env, Environment::Live);
    assert!(!params.auto_load);
    assert!(params.token.is_none());
}

#[test]
fn launch_params_tests_rejects_unknown_environment() {
    assert!(matches!(
        LaunchParams::from_query("env=staging"),
        Err(ConfigError::UnknownEnvironment(env)) if env == "staging"
    ));
}

#[test]
fn launch_params_tests_data_file_needs_asset_base() {
    let config = WidgetConfig::default();
    assert!(matches!(
        config.resolve_data_file("demo.json"),
        Err(ConfigError::MissingAssetBase)
    ));

    let config = WidgetConfig {
        asset_base: Some("https://assets.example.test/data/".to_string()),
        ..WidgetConfig::default()
    };
    assert_eq!(
        config
            .resolve_data_file("demo.json")
            .expect("joins under base")
            .as_str(),
        "https://assets.example.test/data/demo.json"
    );
}
