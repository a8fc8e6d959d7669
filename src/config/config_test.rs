use super::*;
use tempfile::TempDir;

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    assert_eq!(config.storage.driver, "sqlite");
    assert_eq!(config.http.port, crate::constants::DEFAULT_HTTP_PORT);
    assert!(config.validate().is_ok());
}

#[test]
fn default_config_round_trips_through_json() {
    let config = Config::default();
    let json = serde_json::to_string_pretty(&config).unwrap();
    let parsed: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.storage.driver, config.storage.driver);
    assert_eq!(parsed.http.port, config.http.port);
}

#[test]
fn validate_rejects_empty_storage_driver() {
    let mut config = Config::default();
    config.storage.driver = String::new();
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_unknown_storage_driver() {
    let mut config = Config::default();
    config.storage.driver = "oracle".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn validate_allows_empty_dsn_for_memory_driver() {
    let mut config = Config::default();
    config.storage.driver = crate::constants::STORAGE_DRIVER_MEMORY.to_string();
    config.storage.dsn = String::new();
    assert!(config.validate().is_ok());
}

#[test]
fn validate_rejects_empty_dsn_for_sqlite_driver() {
    let mut config = Config::default();
    config.storage.dsn = String::new();
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_zero_http_port() {
    let mut config = Config::default();
    config.http.port = 0;
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_cors_origin_without_scheme() {
    let mut config = Config::default();
    config.http.allowed_origins = Some(vec!["example.com".to_string()]);
    assert!(config.validate().is_err());
}

#[test]
fn validate_accepts_well_formed_cors_origin() {
    let mut config = Config::default();
    config.http.allowed_origins = Some(vec!["https://example.com".to_string()]);
    assert!(config.validate().is_ok());
}

#[test]
fn validate_rejects_nonpositive_oauth_ttls() {
    let mut config = Config::default();
    config.oauth.state_ttl_secs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_pool_size_below_two() {
    let mut config = Config::default();
    config.limits.min_pool_size = 1;
    assert!(config.validate().is_err());
}

#[test]
fn load_from_path_reads_json() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("mxcp.config.json");

    std::fs::write(
        &config_path,
        r#"{
            "storage": { "driver": "sqlite", "dsn": ":memory:" },
            "http": { "host": "127.0.0.1", "port": 9090 }
        }"#,
    )
    .unwrap();

    let config = Config::load_from_path(&config_path).unwrap();
    assert_eq!(config.storage.dsn, ":memory:");
    assert_eq!(config.http.port, 9090);
}

#[test]
fn load_from_path_reads_yaml() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("mxcp.config.yaml");

    std::fs::write(
        &config_path,
        "storage:\n  driver: sqlite\n  dsn: \":memory:\"\nhttp:\n  port: 9091\n",
    )
    .unwrap();

    let config = Config::load_from_path(&config_path).unwrap();
    assert_eq!(config.http.port, 9091);
}

#[test]
fn load_from_path_missing_file_is_not_found() {
    let result = Config::load_from_path("/nonexistent/mxcp.config.json");
    assert!(result.is_err());
}

#[test]
fn load_from_path_rejects_malformed_json_before_deserializing() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("mxcp.config.json");
    std::fs::write(&config_path, r#"{ "endpointsDir": 5 }"#).unwrap();

    let result = Config::load_from_path(&config_path);
    assert!(result.is_err());
}

#[test]
fn save_then_load_round_trips() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("mxcp.config.json");

    let mut config = Config::default();
    config.http.port = 8088;
    config.save_to_path(&config_path).unwrap();

    let loaded = Config::load_from_path(&config_path).unwrap();
    assert_eq!(loaded.http.port, 8088);
}
