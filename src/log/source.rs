//! [`LogSource`] and the debug-filter grammar that decides which `Debug`
//! call sites get through.

use crate::sync::Mutex;
use std::sync::OnceLock;

/// Coarse category a `Debug`-level message belongs to, selectable via the
/// debug filter grammar (`-all,+packet`, etc).
bitflags_like! {
    pub struct DebugGroup: u8 {
        const NONE   = 0b0000_0000;
        const COMMON = 0b0000_0001;
        const EVENT  = 0b0000_0010;
        const PACKET = 0b0000_0100;
        const OBJECT = 0b0000_1000;
        const LIBUSB = 0b0001_0000;
        const ALL    = 0b0001_1111;
    }
}

/// A handful of per-line exceptions a source can carry: `(line, included)`,
/// bounded to a small fixed array rather than a growable collection,
/// matching `log.c`'s own fixed-size per-source override table.
const MAX_SOURCE_LINES: usize = 4;

struct Cache {
    filter_version: u32,
    included: DebugGroup,
    lines: [Option<(u32, bool)>; MAX_SOURCE_LINES],
    lines_used: usize,
}

impl Default for Cache {
    fn default() -> Self {
        Cache {
            filter_version: 0,
            included: DebugGroup::ALL,
            lines: [None; MAX_SOURCE_LINES],
            lines_used: 0,
        }
    }
}

/// A process-static call-site identity, one per module, mirroring `log.c`'s
/// `LogSource`: a name derived from `file!()` and a cache of which debug
/// groups it currently admits, kept valid against a global filter version
/// so hot `Debug` call sites do no string work once warmed up.
///
/// Construct one `static` per module with [`LogSource::new`] and pass it to
/// every [`Logger`](super::Logger) call from that module.
pub struct LogSource {
    file: &'static str,
    name: OnceLock<&'static str>,
    cache: Mutex<Cache>,
}

impl LogSource {
    /// Creates a source identified by `file` (pass `file!()` at the call
    /// site). The displayed name is the last path component, computed
    /// lazily the first time it's needed.
    pub const fn new(file: &'static str) -> LogSource {
        LogSource {
            file,
            name: OnceLock::new(),
            cache: Mutex::new(Cache {
                filter_version: 0,
                included: DebugGroup::ALL,
                lines: [None; MAX_SOURCE_LINES],
                lines_used: 0,
            }),
        }
    }

    /// The source's display name: the last path component of `file!()`.
    pub fn name(&self) -> &'static str {
        self.name.get_or_init(|| {
            self.file
                .rsplit(['/', '\\'])
                .next()
                .unwrap_or(self.file)
        })
    }

    pub(super) fn file(&self) -> &'static str {
        self.file
    }

    /// Returns whether `group` is currently admitted at `line` (0 meaning
    /// "no specific line"), recomputing the cache first if it is stale
    /// against `current_version` using `filters`.
    pub(super) fn admits(
        &self,
        group: DebugGroup,
        line: u32,
        current_version: u32,
        filters: &[FilterItem],
    ) -> bool {
        let mut cache = self.cache.lock();
        if cache.filter_version < current_version {
            recompute(&mut cache, self.name(), filters, current_version);
        }

        if line > 0 {
            for i in 0..cache.lines_used {
                if let Some((number, included)) = cache.lines[i] {
                    if number == line {
                        return included;
                    }
                }
            }
        }

        cache.included.contains(group)
    }
}

fn recompute(cache: &mut Cache, name: &str, filters: &[FilterItem], current_version: u32) {
    cache.filter_version = current_version;
    cache.included = DebugGroup::ALL;
    cache.lines = [None; MAX_SOURCE_LINES];
    cache.lines_used = 0;

    for item in filters {
        match &item.target {
            FilterTarget::Group(group) => {
                if item.included {
                    cache.included |= *group;
                } else {
                    cache.included = DebugGroup(cache.included.bits() & !group.bits());
                }
            }
            FilterTarget::Source(source_name) => {
                if !source_name.eq_ignore_ascii_case(name) {
                    continue;
                }
                match item.line {
                    None => {
                        cache.included = if item.included {
                            DebugGroup::ALL
                        } else {
                            DebugGroup::NONE
                        };
                    }
                    Some(number) => {
                        let slot = (0..cache.lines_used)
                            .find(|&i| matches!(cache.lines[i], Some((n, _)) if n == number));
                        let index = match slot {
                            Some(i) => i,
                            None => {
                                if cache.lines_used >= MAX_SOURCE_LINES {
                                    continue;
                                }
                                let i = cache.lines_used;
                                cache.lines_used += 1;
                                i
                            }
                        };
                        cache.lines[index] = Some((number, item.included));
                    }
                }
            }
        }
    }
}

#[derive(Clone)]
pub(super) enum FilterTarget {
    Group(DebugGroup),
    Source(String),
}

/// One parsed item of a debug filter string: `[+|-]NAME[:LINE]`.
#[derive(Clone)]
pub(super) struct FilterItem {
    pub(super) included: bool,
    pub(super) target: FilterTarget,
    pub(super) line: Option<u32>,
}

/// Parses the comma-separated debug filter grammar. Returns `Err` with a
/// human-readable reason on the first malformed item; the caller (the
/// logger) keeps the previous filter and logs the message as a warning,
/// exactly as `log_set_debug_filter` does.
pub(super) fn parse_filter(filter: &str) -> Result<Vec<FilterItem>, String> {
    let mut items = Vec::new();
    let mut rest = filter;

    if filter.is_empty() {
        return Ok(items);
    }

    loop {
        let (included, body) = match rest.as_bytes().first() {
            Some(b'+') => (true, &rest[1..]),
            Some(b'-') => (false, &rest[1..]),
            Some(c) => {
                return Err(format!(
                    "unexpected char '{}' in debug filter '{}'",
                    *c as char, filter
                ))
            }
            None => return Err(format!("empty item in debug filter '{}'", filter)),
        };

        let item_end = body.find(',').unwrap_or(body.len());
        let (item, remainder) = body.split_at(item_end);

        let (name_part, line_part) = match item.find(':') {
            Some(idx) => (&item[..idx], Some(&item[idx + 1..])),
            None => (item, None),
        };

        if name_part.is_empty() {
            return Err(format!("empty source name in debug filter '{}'", filter));
        }

        let line = match line_part {
            Some(digits) => {
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(format!(
                        "invalid line number in debug filter '{}'",
                        filter
                    ));
                }
                let value: u32 = digits
                    .parse()
                    .map_err(|_| format!("invalid line number in debug filter '{}'", filter))?;
                if value == 0 || value > 100_000 {
                    return Err(format!(
                        "invalid line number in debug filter '{}'",
                        filter
                    ));
                }
                Some(value)
            }
            None => None,
        };

        let target = match group_keyword(name_part) {
            Some(group) => {
                if line.is_some() {
                    // A line number on a group keyword is ignored, matching
                    // log.c: groups apply source-wide, never per-line.
                }
                FilterTarget::Group(group)
            }
            None => FilterTarget::Source(name_part.to_owned()),
        };
        let line = if matches!(target, FilterTarget::Group(_)) {
            None
        } else {
            line
        };

        items.push(FilterItem {
            included,
            target,
            line,
        });

        if remainder.is_empty() {
            break;
        }
        if !remainder.starts_with(',') {
            break;
        }
        rest = &remainder[1..];
        if rest.is_empty() {
            return Err(format!("debug filter '{}' ends with a trailing comma", filter));
        }
    }

    Ok(items)
}

fn group_keyword(name: &str) -> Option<DebugGroup> {
    match name.to_ascii_lowercase().as_str() {
        "common" => Some(DebugGroup::COMMON),
        "event" => Some(DebugGroup::EVENT),
        "packet" => Some(DebugGroup::PACKET),
        "object" => Some(DebugGroup::OBJECT),
        "libusb" => Some(DebugGroup::LIBUSB),
        "all" => Some(DebugGroup::ALL),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_filter() {
        let items = parse_filter("-all,+packet").unwrap();
        assert_eq!(items.len(), 2);
        assert!(!items[0].included);
        assert!(matches!(items[0].target, FilterTarget::Group(DebugGroup::ALL)));
        assert!(items[1].included);
        assert!(matches!(items[1].target, FilterTarget::Group(DebugGroup::PACKET)));
    }

    #[test]
    fn parses_source_with_line() {
        let items = parse_filter("+writer.rs:42").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].line, Some(42));
        assert!(matches!(&items[0].target, FilterTarget::Source(name) if name == "writer.rs"));
    }

    #[test]
    fn rejects_trailing_comma() {
        assert!(parse_filter("+packet,").is_err());
    }

    #[test]
    fn rejects_empty_name() {
        assert!(parse_filter("+:3").is_err());
    }

    #[test]
    fn rejects_bad_prefix() {
        assert!(parse_filter("packet").is_err());
    }

    #[test]
    fn source_admits_after_filter_applied() {
        let source = LogSource::new("src/packet.rs");
        let filters = parse_filter("-all,+packet").unwrap();
        assert!(source.admits(DebugGroup::PACKET, 0, 1, &filters));
        assert!(!source.admits(DebugGroup::COMMON, 0, 1, &filters));
    }
}
