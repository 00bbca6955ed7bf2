//! `key = value` configuration file loader feeding a typed option table.
//!
//! Grounded on `original_source/conf_file.c` (line-oriented parsing) and
//! `original_source/config.c` (the typed option table sitting on top of it).
//! The parser itself (`ConfFile`) knows nothing about option types; it just
//! produces a flat, ordered list of `name = value` lines with last-one-wins
//! lookup. [`Config`] is what maps those onto a caller-declared table of
//! [`OptionSpec`]s, doing the same per-type validation `config_init` does.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::log::LogLevel;

/// Longest line `ConfFile::read` will accept; longer lines are skipped with
/// a warning rather than failing the whole load (`conf_file.c`'s
/// `MAX_LINE_LENGTH`, 32768).
const MAX_LINE_LENGTH: usize = 32 * 1024;

bitflags_like! {
    /// Flags a [`ConfFile`] is opened with.
    pub struct ConfFileFlags: u32 {
        const NONE = 0;
        /// Strip leading/trailing whitespace from `value` as well as `name`.
        /// Without this, only `name` is trimmed (matching `conf_file.c`'s
        /// `CONF_FILE_FLAG_TRIM_VALUE_ON_READ`).
        const TRIM_VALUE_ON_READ = 0x0001;
    }
}

/// One warning `ConfFile::read` can report for a single malformed line;
/// mirrors `conf_file.c`'s `ConfFileReadWarning` enum exactly.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReadWarning {
    LineTooLong,
    NameMissing,
    EqualSignMissing,
}

impl fmt::Display for ReadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadWarning::LineTooLong => write!(f, "line is too long"),
            ReadWarning::NameMissing => write!(f, "line has no option name"),
            ReadWarning::EqualSignMissing => write!(f, "line has no '=' sign"),
        }
    }
}

/// A diagnostic emitted while reading a file: which line, what went wrong,
/// and (truncated, for `LineTooLong`) the raw text.
#[derive(Clone, Debug)]
pub struct ReadDiagnostic {
    pub line_number: u32,
    pub warning: ReadWarning,
    pub raw: String,
}

struct Line {
    name: Option<String>,
    value: Option<String>,
}

/// A parsed `.conf` file: an ordered list of `name = value` lines (plus
/// comment/blank/malformed lines that carry neither), with case-insensitive
/// last-assignment-wins lookup.
///
/// Knows nothing about option types or defaults; that's [`Config`]'s job.
#[derive(Default)]
pub struct ConfFile {
    flags: ConfFileFlags,
    lines: Vec<Line>,
}

impl ConfFile {
    pub fn new(flags: ConfFileFlags) -> ConfFile {
        ConfFile {
            flags,
            lines: Vec::new(),
        }
    }

    /// Reads and parses `path`. A missing file is not an error — an empty
    /// `ConfFile` is returned, exactly as `conf_file_read` treats `ENOENT`
    /// as a no-op at the `config_init` call site. Every diagnostic
    /// (line-too-long, name-missing, equal-sign-missing) is appended to the
    /// returned `Vec` rather than aborting the read.
    pub fn read<P: AsRef<Path>>(path: P, flags: ConfFileFlags) -> std::io::Result<(ConfFile, Vec<ReadDiagnostic>)> {
        let mut conf_file = ConfFile::new(flags);
        let mut diagnostics = Vec::new();

        let contents = match fs::read_to_string(path.as_ref()) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok((conf_file, diagnostics));
            }
            Err(err) => return Err(err),
        };

        for (index, raw_line) in contents.split('\n').enumerate() {
            // `split('\n')` leaves a trailing empty element when the file
            // ends with a newline; conf_file.c's own reader treats that
            // final, empty fragment as nothing (no 0-length line is ever
            // parsed past the last `\n`).
            if raw_line.is_empty() && index == contents.split('\n').count() - 1 {
                continue;
            }

            let number = (index + 1) as u32;
            // tolerate CRLF: a trailing \r is treated as ordinary trailing
            // whitespace, same as conf_file.c.
            let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);

            if line.len() > MAX_LINE_LENGTH {
                let mut truncated: String = line.chars().take(32).collect();
                truncated.push_str("...");
                diagnostics.push(ReadDiagnostic {
                    line_number: number,
                    warning: ReadWarning::LineTooLong,
                    raw: truncated,
                });
                continue;
            }

            conf_file.parse_line(number, line, &mut diagnostics);
        }

        Ok((conf_file, diagnostics))
    }

    fn parse_line(&mut self, number: u32, raw: &str, diagnostics: &mut Vec<ReadDiagnostic>) {
        let trimmed_start = raw.trim_start_matches([' ', '\t', '\r']);

        if trimmed_start.is_empty() || trimmed_start.starts_with('#') {
            self.lines.push(Line { name: None, value: None });
            return;
        }

        let equal_pos = match trimmed_start.find('=') {
            Some(pos) => pos,
            None => {
                diagnostics.push(ReadDiagnostic {
                    line_number: number,
                    warning: ReadWarning::EqualSignMissing,
                    raw: raw.to_owned(),
                });
                self.lines.push(Line { name: None, value: None });
                return;
            }
        };

        let name_part = trimmed_start[..equal_pos].trim_end_matches([' ', '\t', '\r']);
        let mut value_part = &trimmed_start[equal_pos + 1..];

        if name_part.is_empty() {
            diagnostics.push(ReadDiagnostic {
                line_number: number,
                warning: ReadWarning::NameMissing,
                raw: raw.to_owned(),
            });
            self.lines.push(Line { name: None, value: None });
            return;
        }

        if self.flags.contains(ConfFileFlags::TRIM_VALUE_ON_READ) {
            value_part = value_part.trim_matches([' ', '\t', '\r']);
        }

        self.lines.push(Line {
            name: Some(name_part.to_owned()),
            value: Some(value_part.to_owned()),
        });
    }

    /// The last assignment to `name` (case-insensitive), or `None` if it
    /// never occurred.
    pub fn option_value(&self, name: &str) -> Option<&str> {
        self.lines
            .iter()
            .rev()
            .find(|line| {
                line.name
                    .as_deref()
                    .is_some_and(|line_name| line_name.eq_ignore_ascii_case(name))
            })
            .and_then(|line| line.value.as_deref())
    }
}

/// The kind of value an [`OptionSpec`] holds, and how its text
/// representation in the config file is validated.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OptionKind {
    /// Bounded by `string_min_length`/`string_max_length` (`-1`/`None` for
    /// "unbounded above").
    String,
    /// Bounded by `integer_min`/`integer_max`.
    Integer,
    /// `"on"` / `"off"`, case-insensitively.
    Boolean,
    /// `"error"`/`"warn"`/`"info"`/`"debug"`, case-insensitively.
    LogLevel,
    /// One of a fixed, caller-declared set of allowed spellings.
    Symbol,
}

/// A resolved option value, tagged with its [`OptionKind`].
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigValue {
    String(Option<String>),
    Integer(i64),
    Boolean(bool),
    LogLevel(LogLevel),
    Symbol(String),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(value) => value.as_deref(),
            ConfigValue::Symbol(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            ConfigValue::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_log_level(&self) -> Option<LogLevel> {
        match self {
            ConfigValue::LogLevel(value) => Some(*value),
            _ => None,
        }
    }
}

/// Declares one named option: its kind, default, legacy alias (renamed
/// options still accept their old key), and type-specific constraints.
/// Mirrors `config.c`'s static `ConfigOption` table, one entry per option a
/// daemon built on this crate wants to expose.
#[derive(Clone, Debug)]
pub struct OptionSpec {
    pub name: &'static str,
    pub legacy_name: Option<&'static str>,
    pub kind: OptionKind,
    pub default: ConfigValue,
    /// `(min_length, max_length)` for [`OptionKind::String`]; `max_length`
    /// of `None` means unbounded, matching `config.c`'s `-1` sentinel.
    pub string_length: (usize, Option<usize>),
    /// `(min, max)` for [`OptionKind::Integer`].
    pub integer_range: (i64, i64),
    /// Allowed spellings for [`OptionKind::Symbol`], compared
    /// case-insensitively.
    pub symbols: &'static [&'static str],
}

/// A diagnostic emitted while validating a parsed value against its
/// [`OptionSpec`] (distinct from [`ReadDiagnostic`], which is about line
/// syntax, not option semantics).
#[derive(Clone, Debug)]
pub struct ValidationWarning {
    pub name: &'static str,
    pub message: String,
}

/// A loaded, validated set of option values, keyed by [`OptionSpec::name`].
///
/// Options never mentioned in the file (or whose value failed validation)
/// keep their spec's default; this is `config_init`'s behavior exactly —
/// a bad value for one option does not prevent other options from loading
/// successfully.
pub struct Config {
    values: HashMap<&'static str, ConfigValue>,
    using_default_values: bool,
    read_diagnostics: Vec<ReadDiagnostic>,
    validation_warnings: Vec<ValidationWarning>,
}

impl Config {
    /// Loads `path` against `specs`, applying [`ConfFileFlags::TRIM_VALUE_ON_READ`].
    /// A missing file is not an error: every option keeps its spec default
    /// and [`Config::using_default_values`] reports `true`.
    pub fn load<P: AsRef<Path>>(path: P, specs: &[OptionSpec]) -> std::io::Result<Config> {
        let (conf_file, read_diagnostics) =
            ConfFile::read(&path, ConfFileFlags::TRIM_VALUE_ON_READ)?;
        let using_default_values = read_diagnostics.is_empty() && !path.as_ref().exists();

        let mut values = HashMap::with_capacity(specs.len());
        let mut validation_warnings = Vec::new();

        for spec in specs {
            let mut raw = conf_file.option_value(spec.name);
            let mut used_name = spec.name;
            if raw.is_none() {
                if let Some(legacy) = spec.legacy_name {
                    raw = conf_file.option_value(legacy);
                    used_name = legacy;
                }
            }

            let value = match raw {
                None => spec.default.clone(),
                Some(text) => match validate(spec, used_name, text) {
                    Ok(value) => value,
                    Err(message) => {
                        validation_warnings.push(ValidationWarning {
                            name: spec.name,
                            message,
                        });
                        spec.default.clone()
                    }
                },
            };

            values.insert(spec.name, value);
        }

        Ok(Config {
            values,
            using_default_values,
            read_diagnostics,
            validation_warnings,
        })
    }

    /// Runs the same parse/validate pass as [`Config::load`] but never
    /// mutates process state and routes every diagnostic to `stderr`
    /// instead of the logger — the logger is not guaranteed to exist yet
    /// during early `--check-config`-style startup validation. Returns
    /// `true` if no error-level problem was found (a missing file is not
    /// an error; a validation warning is, matching `config_check`'s
    /// treatment of `_has_warning` as load-failing).
    pub fn validate_only<P: AsRef<Path>>(path: P, specs: &[OptionSpec]) -> std::io::Result<bool> {
        let config = Config::load(&path, specs)?;

        if !config.read_diagnostics.is_empty() {
            eprintln!("Warning(s) in config file '{}'", path.as_ref().display());
            for diagnostic in &config.read_diagnostics {
                eprintln!("Line {} {}: {}", diagnostic.line_number, diagnostic.warning, diagnostic.raw);
            }
        }
        if !config.validation_warnings.is_empty() {
            for warning in &config.validation_warnings {
                eprintln!("Option '{}': {}", warning.name, warning.message);
            }
        }

        if config.using_default_values {
            eprintln!("Config file '{}' not found, using default values", path.as_ref().display());
        } else if config.read_diagnostics.is_empty() && config.validation_warnings.is_empty() {
            eprintln!("No warnings or errors in config file '{}'", path.as_ref().display());
        }

        eprintln!();
        eprintln!("Using the following config values:");
        for spec in specs {
            eprintln!("  {} = {}", spec.name, describe(config.get(spec.name).unwrap()));
        }

        Ok(config.read_diagnostics.is_empty() && config.validation_warnings.is_empty())
    }

    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.values.get(name)
    }

    pub fn using_default_values(&self) -> bool {
        self.using_default_values
    }

    pub fn read_diagnostics(&self) -> &[ReadDiagnostic] {
        &self.read_diagnostics
    }

    pub fn validation_warnings(&self) -> &[ValidationWarning] {
        &self.validation_warnings
    }
}

fn describe(value: &ConfigValue) -> String {
    match value {
        ConfigValue::String(Some(s)) => s.clone(),
        ConfigValue::String(None) => String::new(),
        ConfigValue::Integer(i) => i.to_string(),
        ConfigValue::Boolean(b) => if *b { "on" } else { "off" }.to_owned(),
        ConfigValue::LogLevel(level) => level.as_str().to_owned(),
        ConfigValue::Symbol(s) => s.clone(),
    }
}

fn validate(spec: &OptionSpec, name: &str, text: &str) -> Result<ConfigValue, String> {
    match spec.kind {
        OptionKind::String => {
            let (min, max) = spec.string_length;
            if text.len() < min {
                return Err(format!(
                    "value '{}' for {} option is too short (minimum: {} chars)",
                    text, name, min
                ));
            }
            if let Some(max) = max {
                if text.len() > max {
                    return Err(format!(
                        "value '{}' for {} option is too long (maximum: {} chars)",
                        text, name, max
                    ));
                }
            }
            Ok(ConfigValue::String(if text.is_empty() {
                None
            } else {
                Some(text.to_owned())
            }))
        }
        OptionKind::Integer => {
            let value: i64 = text
                .parse()
                .map_err(|_| format!("value '{}' for {} option is not an integer", text, name))?;
            let (min, max) = spec.integer_range;
            if value < min || value > max {
                return Err(format!(
                    "value {} for {} option is out-of-range (minimum: {}, maximum: {})",
                    value, name, min, max
                ));
            }
            Ok(ConfigValue::Integer(value))
        }
        OptionKind::Boolean => {
            if text.eq_ignore_ascii_case("on") {
                Ok(ConfigValue::Boolean(true))
            } else if text.eq_ignore_ascii_case("off") {
                Ok(ConfigValue::Boolean(false))
            } else {
                Err(format!("value '{}' for {} option is invalid", text, name))
            }
        }
        OptionKind::LogLevel => LogLevel::parse(text)
            .map(ConfigValue::LogLevel)
            .ok_or_else(|| format!("value '{}' for {} option is invalid", text, name)),
        OptionKind::Symbol => {
            if spec.symbols.iter().any(|symbol| symbol.eq_ignore_ascii_case(text)) {
                Ok(ConfigValue::Symbol(text.to_owned()))
            } else {
                Err(format!("value '{}' for {} option is invalid", text, name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_file() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("daemon-runtime-config-test-{}-1", std::process::id()));
        std::fs::write(&path, "log.level = info\n# comment\nlog.level = debug\n\n").unwrap();

        let (conf_file, diagnostics) =
            ConfFile::read(&path, ConfFileFlags::TRIM_VALUE_ON_READ).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(conf_file.option_value("log.level"), Some("debug"));
        assert_eq!(conf_file.option_value("log.LEVEL"), Some("debug"));
        assert_eq!(conf_file.option_value("missing"), None);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let path = std::env::temp_dir().join("daemon-runtime-config-test-does-not-exist");
        let (conf_file, diagnostics) =
            ConfFile::read(&path, ConfFileFlags::NONE).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(conf_file.option_value("anything"), None);
    }

    #[test]
    fn crlf_is_tolerated_and_value_trimmed() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("daemon-runtime-config-test-{}-2", std::process::id()));
        std::fs::write(&path, "name = value \r\n").unwrap();

        let (conf_file, _) = ConfFile::read(&path, ConfFileFlags::TRIM_VALUE_ON_READ).unwrap();
        assert_eq!(conf_file.option_value("name"), Some("value"));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn value_not_trimmed_without_flag() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("daemon-runtime-config-test-{}-3", std::process::id()));
        std::fs::write(&path, "name =  value  \n").unwrap();

        let (conf_file, _) = ConfFile::read(&path, ConfFileFlags::NONE).unwrap();
        assert_eq!(conf_file.option_value("name"), Some(" value  "));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_equal_sign_warns() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("daemon-runtime-config-test-{}-4", std::process::id()));
        std::fs::write(&path, "just-some-text\n").unwrap();

        let (_conf_file, diagnostics) = ConfFile::read(&path, ConfFileFlags::NONE).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].warning, ReadWarning::EqualSignMissing);

        std::fs::remove_file(&path).ok();
    }

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
    fn last_assignment_wins_for_effective_level() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("daemon-runtime-config-test-{}-5", std::process::id()));
        std::fs::write(&path, "log.level = info\nlog.level = debug\n").unwrap();

        let config = Config::load(&path, SPECS).unwrap();
        assert_eq!(config.get("log.level").unwrap().as_log_level(), Some(LogLevel::Debug));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn invalid_value_keeps_default_and_warns() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("daemon-runtime-config-test-{}-6", std::process::id()));
        std::fs::write(&path, "log.level = not-a-level\n").unwrap();

        let config = Config::load(&path, SPECS).unwrap();
        assert_eq!(config.get("log.level").unwrap().as_log_level(), Some(LogLevel::Info));
        assert_eq!(config.validation_warnings().len(), 1);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn unknown_keys_round_trip_verbatim() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("daemon-runtime-config-test-{}-7", std::process::id()));
        std::fs::write(&path, "unrelated.option = kept\n").unwrap();

        let (conf_file, _) = ConfFile::read(&path, ConfFileFlags::TRIM_VALUE_ON_READ).unwrap();
        assert_eq!(conf_file.option_value("unrelated.option"), Some("kept"));

        std::fs::remove_file(&path).ok();
    }
}
