//! End-to-end scenario: a later `name = value` assignment in the config
//! file overrides an earlier one, same as a hand-edited config file where
//! someone appended a correction rather than deleting the original line.

use daemon_runtime::config::{Config, ConfigValue, OptionKind, OptionSpec};
use daemon_runtime::log::LogLevel;

const SPECS: &[OptionSpec] = &[OptionSpec {
    name: "log.level",
    legacy_name: None,
    kind: OptionKind::LogLevel,
    default: ConfigValue::LogLevel(LogLevel::Info),
    string_length: (0, None),
    integer_range: (0, 0),
    symbols: &[],
}];

#[test]
fn later_assignment_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daemon.conf");
    std::fs::write(&path, "log.level = info\nlog.level = debug\n").unwrap();

    let config = Config::load(&path, SPECS).unwrap();
    assert_eq!(config.get("log.level").unwrap().as_log_level(), Some(LogLevel::Debug));
    assert!(config.validation_warnings().is_empty());
    assert!(config.read_diagnostics().is_empty());
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("does-not-exist.conf");

    let config = Config::load(&path, SPECS).unwrap();
    assert!(config.using_default_values());
    assert_eq!(config.get("log.level").unwrap().as_log_level(), Some(LogLevel::Info));
}

#[test]
fn round_trips_unknown_keys_and_tolerates_comments() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daemon.conf");
    std::fs::write(
        &path,
        "# a comment\n\nlog.level = warn\nextra.option = some-value\n",
    )
    .unwrap();

    let (conf_file, diagnostics) = daemon_runtime::config::ConfFile::read(
        &path,
        daemon_runtime::config::ConfFileFlags::TRIM_VALUE_ON_READ,
    )
    .unwrap();
    assert!(diagnostics.is_empty());
    assert_eq!(conf_file.option_value("extra.option"), Some("some-value"));

    let config = Config::load(&path, SPECS).unwrap();
    assert_eq!(config.get("log.level").unwrap().as_log_level(), Some(LogLevel::Warn));
}
