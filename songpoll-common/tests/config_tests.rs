//! Configuration loading: file resolution, graceful degradation, env overrides
//!
//! Tests that touch SONGPOLL_* environment variables are marked #[serial]
//! so they never race each other.

use serial_test::serial;
use songpoll_common::config::{
    load_config, resolve_config_path, SongpollConfig, CACHE_MAX_SIZE_ENV_VAR, CACHE_TTL_ENV_VAR,
    CONFIG_ENV_VAR, FEEDBACK_WEBHOOK_ENV_VAR, LLM_API_KEY_ENV_VAR,
};
use songpoll_common::{Error, SheetLayout};
use std::env;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn clear_env() {
    for var in [
        CONFIG_ENV_VAR,
        LLM_API_KEY_ENV_VAR,
        FEEDBACK_WEBHOOK_ENV_VAR,
        CACHE_TTL_ENV_VAR,
        CACHE_MAX_SIZE_ENV_VAR,
    ] {
        env::remove_var(var);
    }
}

fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_missing_file_falls_back_to_defaults() {
    clear_env();
    let config = load_config(Some(Path::new("/nonexistent/songpoll/config.toml"))).unwrap();
    assert_eq!(config, SongpollConfig::default());
}

#[test]
#[serial]
fn test_cli_path_beats_env_path() {
    clear_env();
    let cli = config_file("[server]\nport = 6000\n");
    let from_env = config_file("[server]\nport = 7000\n");
    env::set_var(CONFIG_ENV_VAR, from_env.path());

    assert_eq!(resolve_config_path(Some(cli.path())).as_deref(), Some(cli.path()));
    assert_eq!(load_config(Some(cli.path())).unwrap().server.port, 6000);
    assert_eq!(load_config(None).unwrap().server.port, 7000);

    clear_env();
}

#[test]
#[serial]
fn test_file_contents_loaded() {
    clear_env();
    let file = config_file(
        r#"
        default_year = 2019

        [scoring]
        min_score = 0.0

        [[partitions]]
        year = 2019
        layout = "legacy"
        source = "sheets/2019.csv"
        "#,
    );
    let config = load_config(Some(file.path())).unwrap();
    assert_eq!(config.default_year, 2019);
    assert_eq!(config.score_bounds().min, 0.0);
    assert_eq!(config.partition(2019).unwrap().layout, SheetLayout::Legacy);
    assert_eq!(config.supported_years(), vec![2019]);
}

#[test]
#[serial]
fn test_malformed_file_is_an_error() {
    clear_env();
    let file = config_file("[server\nport = ");
    assert!(matches!(load_config(Some(file.path())), Err(Error::Parse(_))));
}

#[test]
#[serial]
fn test_invalid_file_fails_validation() {
    clear_env();
    let file = config_file("default_year = 1987\n");
    assert!(matches!(load_config(Some(file.path())), Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_env_overrides() {
    clear_env();
    let file = config_file("[cache]\nttl_seconds = 10\nmax_size = 2\n");
    env::set_var(LLM_API_KEY_ENV_VAR, "secret");
    env::set_var(FEEDBACK_WEBHOOK_ENV_VAR, "https://hooks.example.com/x");
    env::set_var(CACHE_TTL_ENV_VAR, "120");
    env::set_var(CACHE_MAX_SIZE_ENV_VAR, "25");

    let config = load_config(Some(file.path())).unwrap();
    assert_eq!(config.llm.api_key.as_deref(), Some("secret"));
    assert!(config.llm.enabled());
    assert_eq!(config.feedback.webhook_url.as_deref(), Some("https://hooks.example.com/x"));
    assert_eq!(config.cache.ttl_seconds, 120);
    assert_eq!(config.cache.max_size, 25);

    clear_env();
}

#[test]
#[serial]
fn test_empty_env_values_ignored() {
    clear_env();
    env::set_var(LLM_API_KEY_ENV_VAR, "  ");
    let config = load_config(Some(Path::new("/nonexistent.toml"))).unwrap();
    assert!(config.llm.api_key.is_none());
    clear_env();
}

#[test]
#[serial]
fn test_bad_numeric_env_is_config_error() {
    clear_env();
    env::set_var(CACHE_MAX_SIZE_ENV_VAR, "lots");
    let err = load_config(Some(Path::new("/nonexistent.toml"))).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    clear_env();

    env::set_var(CACHE_MAX_SIZE_ENV_VAR, "0");
    assert!(load_config(Some(Path::new("/nonexistent.toml"))).is_err());
    clear_env();
}
