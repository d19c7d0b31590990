use std::env;
use std::fs;

use clap::Parser;
use fragcache::config::{CliArgs, LoadError, load};
use serial_test::serial;
use tempfile::TempDir;

const CAPACITY_VAR: &str = "FRAGCACHE__CACHE__MEMORY_CAPACITY";
const DRIVER_VAR: &str = "FRAGCACHE__CACHE__DRIVER";

fn write_config(dir: &TempDir, contents: &str) -> String {
    let path = dir.path().join("fragcache.toml");
    fs::write(&path, contents).expect("config file should be written");
    path.to_string_lossy().into_owned()
}

fn clear_env() {
    // SAFETY: tests touching the process environment run serially.
    unsafe {
        env::remove_var(CAPACITY_VAR);
        env::remove_var(DRIVER_VAR);
    }
}

#[test]
#[serial]
fn environment_overrides_config_file() {
    clear_env();
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(
        &dir,
        "[cache]\ndriver = \"file\"\nmemory_capacity = 10\ndefault_locale = \"de\"\n",
    );
    // SAFETY: tests touching the process environment run serially.
    unsafe { env::set_var(CAPACITY_VAR, "25") };

    let cli = CliArgs::parse_from(["fragcache", "--config-file", path.as_str(), "token", "home"]);
    let settings = load(&cli);
    clear_env();

    let settings = settings.expect("valid settings");
    assert_eq!(settings.cache.driver, "file");
    assert_eq!(settings.cache.memory_capacity, 25);
    assert_eq!(settings.cache.default_locale, "de");
}

#[test]
#[serial]
fn cli_overrides_environment() {
    clear_env();
    // SAFETY: tests touching the process environment run serially.
    unsafe { env::set_var(DRIVER_VAR, "file") };

    let cli = CliArgs::parse_from(["fragcache", "--cache-driver", "array", "expire", "home"]);
    let settings = load(&cli);
    clear_env();

    assert_eq!(settings.expect("valid settings").cache.driver, "array");
}

#[test]
#[serial]
fn invalid_file_values_are_reported_by_key() {
    clear_env();
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(&dir, "[cache]\nmemory_capacity = 0\n");

    let cli = CliArgs::parse_from(["fragcache", "--config-file", path.as_str(), "token", "home"]);
    let err = load(&cli).expect_err("zero capacity is invalid");

    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.memory_capacity",
            ..
        }
    ));
}

#[test]
#[serial]
fn missing_explicit_config_file_fails() {
    clear_env();
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("absent.toml").to_string_lossy().into_owned();

    let cli = CliArgs::parse_from(["fragcache", "--config-file", path.as_str(), "token", "home"]);
    assert!(matches!(load(&cli), Err(LoadError::Build(_))));
}
