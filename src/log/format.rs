//! Line layout and ANSI color wrapping for the logger's rendered output.

use super::LogLevel;
use crate::log::source::DebugGroup;
use std::fmt::Write as _;

const RESET: &str = "\x1b[0m";

fn color_code(level: LogLevel) -> Option<&'static str> {
    match level {
        LogLevel::Error => Some("\x1b[1;31m"),
        LogLevel::Warn => Some("\x1b[1;34m"),
        LogLevel::Info => Some("\x1b[1m"),
        LogLevel::Debug => None,
    }
}

fn level_letter(level: LogLevel) -> char {
    match level {
        LogLevel::Error => 'E',
        LogLevel::Warn => 'W',
        LogLevel::Info => 'I',
        LogLevel::Debug => 'D',
    }
}

/// Lowercase keyword for the first bit set in `group`, or `None` if `group`
/// is [`DebugGroup::NONE`]. Used only for rendering; a message tagged with
/// more than one bit renders under its lowest-valued one.
fn group_keyword(group: DebugGroup) -> Option<&'static str> {
    if group.contains(DebugGroup::COMMON) {
        Some("common")
    } else if group.contains(DebugGroup::EVENT) {
        Some("event")
    } else if group.contains(DebugGroup::PACKET) {
        Some("packet")
    } else if group.contains(DebugGroup::OBJECT) {
        Some("object")
    } else if group.contains(DebugGroup::LIBUSB) {
        Some("libusb")
    } else {
        None
    }
}

/// Renders one log line into `out`, appending a trailing `\n`.
///
/// Layout: `YYYY-MM-DD HH:MM:SS.uuuuuu <L> <[group|]source:line-or-function> message`.
/// `line` of `0` means no line number was supplied at the call site, in
/// which case `function` stands in for it.
#[allow(clippy::too_many_arguments)]
pub(super) fn format_line(
    out: &mut String,
    timestamp: &str,
    level: LogLevel,
    group: DebugGroup,
    source_name: &str,
    line: u32,
    function: &str,
    message: &str,
    color: bool,
) {
    if color {
        if let Some(code) = color_code(level) {
            out.push_str(code);
        }
    }

    let _ = write!(out, "{} <{}> <", timestamp, level_letter(level));
    if let Some(keyword) = group_keyword(group) {
        let _ = write!(out, "{}|", keyword);
    }
    if line > 0 {
        let _ = write!(out, "{}:{}", source_name, line);
    } else {
        let _ = write!(out, "{}:{}", source_name, function);
    }
    out.push('>');
    out.push(' ');
    out.push_str(message);

    if color && color_code(level).is_some() {
        out.push_str(RESET);
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_without_color_or_group() {
        let mut line = String::new();
        format_line(
            &mut line,
            "2026-07-28 10:00:00.000000",
            LogLevel::Info,
            DebugGroup::NONE,
            "writer.rs",
            42,
            "push_to_backlog",
            "queued packet",
            false,
        );
        assert_eq!(
            line,
            "2026-07-28 10:00:00.000000 <I> <writer.rs:42> queued packet\n"
        );
    }

    #[test]
    fn formats_with_group_and_function_fallback() {
        let mut line = String::new();
        format_line(
            &mut line,
            "2026-07-28 10:00:00.000000",
            LogLevel::Debug,
            DebugGroup::PACKET,
            "writer",
            0,
            "drain",
            "draining backlog",
            false,
        );
        assert_eq!(
            line,
            "2026-07-28 10:00:00.000000 <D> <packet|writer:drain> draining backlog\n"
        );
    }

    #[test]
    fn wraps_error_in_color() {
        let mut line = String::new();
        format_line(
            &mut line,
            "2026-07-28 10:00:00.000000",
            LogLevel::Error,
            DebugGroup::NONE,
            "io.rs",
            10,
            "read",
            "read failed",
            true,
        );
        assert!(line.starts_with("\x1b[1;31m"));
        assert!(line.trim_end().ends_with("\x1b[0m"));
    }

    #[test]
    fn debug_never_colored() {
        let mut line = String::new();
        format_line(
            &mut line,
            "2026-07-28 10:00:00.000000",
            LogLevel::Debug,
            DebugGroup::NONE,
            "io.rs",
            10,
            "read",
            "trace",
            true,
        );
        assert!(!line.contains("\x1b["));
    }
}
