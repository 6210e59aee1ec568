//! Configuration file grammar and the option table the core reads at
//! setup.
//!
//! Grammar: one option per line, `name ':' <WS>* value <WS>*`.
//! `#`-prefixed lines and blank/whitespace-only lines are comments. Name
//! charset is `[A-Za-z0-9_]`, up to 31 chars; line length is capped at
//! 1023 bytes, value at 255 bytes after trimming. Values are `bool`
//! (`yes`/`no`), `uint` (base 8/10/16, auto-detected the way C's
//! `strtoul` does: a `0x`/`0X` prefix is hex, a leading `0` followed by
//! more digits is octal, anything else decimal), or `str` (preserved
//! as-is).

use crate::error::Error;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

const MAX_NAME_LEN: usize = 31;
const MAX_LINE_LEN: usize = 1023;
const MAX_VALUE_LEN: usize = 255;

/// A parsed option value, preserving enough of its original shape to
/// round-trip through [`OptionValue::to_string`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    UInt(u64),
    Str(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(true) => f.write_str("yes"),
            OptionValue::Bool(false) => f.write_str("no"),
            OptionValue::UInt(v) => write!(f, "{v}"),
            OptionValue::Str(s) => f.write_str(s),
        }
    }
}

/// Recognized option keys for the core, and their defaults.
#[derive(Debug, Clone)]
pub struct Options {
    pub tcp_backlog: u64,
    pub tcp_poolsize: u64,
    pub stream_poolsize: u64,
    pub log_level: u64,
    pub log_name: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self::load_default()
    }
}

impl Options {
    /// Defaults: `tcp_backlog=128`, `tcp_poolsize=0` (unbounded),
    /// `stream_poolsize=0`, `log_level=4`, `log_name` absent (stderr).
    pub fn load_default() -> Self {
        Self {
            tcp_backlog: 128,
            tcp_poolsize: 0,
            stream_poolsize: 0,
            log_level: 4,
            log_name: None,
        }
    }

    /// Parses a config file and overlays its values onto `self`.
    ///
    /// Unknown keys are rejected with [`Error::UnknownOption`] rather
    /// than silently ignored — a typo in a config file should fail
    /// loudly at startup, not at 3am when the intended setting never
    /// took effect.
    pub fn load_file(mut self, path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        self.load_str(&contents)?;
        Ok(self)
    }

    /// Parses config text in memory (used by tests and by
    /// [`load_file`](Self::load_file)).
    pub fn load_str(&mut self, contents: &str) -> Result<(), Error> {
        for (idx, raw_line) in contents.lines().enumerate() {
            let lineno = idx + 1;

            if raw_line.len() > MAX_LINE_LEN {
                return Err(Error::OptionParse {
                    line: lineno,
                    reason: format!("line exceeds {MAX_LINE_LEN} bytes"),
                });
            }

            let trimmed = raw_line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let (name, value) = split_option_line(trimmed).ok_or_else(|| Error::OptionParse {
                line: lineno,
                reason: "expected 'name: value'".to_string(),
            })?;

            if name.is_empty() || name.len() > MAX_NAME_LEN {
                return Err(Error::OptionParse {
                    line: lineno,
                    reason: format!("name length must be 1..={MAX_NAME_LEN}"),
                });
            }
            if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(Error::OptionParse {
                    line: lineno,
                    reason: "name must be [A-Za-z0-9_]".to_string(),
                });
            }
            if value.is_empty() {
                return Err(Error::OptionParse {
                    line: lineno,
                    reason: "empty value".to_string(),
                });
            }
            if value.len() > MAX_VALUE_LEN {
                return Err(Error::OptionParse {
                    line: lineno,
                    reason: format!("value exceeds {MAX_VALUE_LEN} bytes after trim"),
                });
            }

            self.apply(name, value, lineno)?;
        }

        Ok(())
    }

    fn apply(&mut self, name: &str, value: &str, lineno: usize) -> Result<(), Error> {
        match name {
            "tcp_backlog" => self.tcp_backlog = parse_uint(value, lineno)?,
            "tcp_poolsize" => self.tcp_poolsize = parse_uint(value, lineno)?,
            "stream_poolsize" => self.stream_poolsize = parse_uint(value, lineno)?,
            "log_level" => self.log_level = parse_uint(value, lineno)?,
            "log_name" => self.log_name = Some(value.to_string()),
            other => return Err(Error::UnknownOption(other.to_string())),
        }
        Ok(())
    }

    /// Renders the current table back to config-file text, one
    /// `name: value` line per option, in a stable order.
    pub fn to_config_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("tcp_backlog: {}\n", self.tcp_backlog));
        out.push_str(&format!("tcp_poolsize: {}\n", self.tcp_poolsize));
        out.push_str(&format!("stream_poolsize: {}\n", self.stream_poolsize));
        out.push_str(&format!("log_level: {}\n", self.log_level));
        if let Some(name) = &self.log_name {
            out.push_str(&format!("log_name: {name}\n"));
        }
        out
    }

    /// Generic lookup returning the raw [`OptionValue`], for anything
    /// that wants to iterate the table rather than poke at named fields
    /// (e.g. a test asserting the full set round-trips).
    pub fn as_map(&self) -> HashMap<&'static str, OptionValue> {
        let mut map = HashMap::new();
        map.insert("tcp_backlog", OptionValue::UInt(self.tcp_backlog));
        map.insert("tcp_poolsize", OptionValue::UInt(self.tcp_poolsize));
        map.insert("stream_poolsize", OptionValue::UInt(self.stream_poolsize));
        map.insert("log_level", OptionValue::UInt(self.log_level));
        if let Some(name) = &self.log_name {
            map.insert("log_name", OptionValue::Str(name.clone()));
        }
        map
    }
}

fn split_option_line(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let name = line[..colon].trim();
    let value = line[colon + 1..].trim();
    Some((name, value))
}

/// Parses a `uint` value with base auto-detection matching C's
/// `strtoul`: `0x`/`0X` prefix selects base 16, a lone leading `0`
/// followed by more digits selects base 8, anything else is base 10.
fn parse_uint(value: &str, lineno: usize) -> Result<u64, Error> {
    let (digits, radix) = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        (hex, 16)
    } else if value.len() > 1 && value.starts_with('0') {
        (&value[1..], 8)
    } else {
        (value, 10)
    };

    u64::from_str_radix(digits, radix).map_err(|_| Error::OptionParse {
        line: lineno,
        reason: format!("{value:?} is not a valid uint"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_load_overlays_defaults_from_file() {
        let file = "\
tcp_backlog: 256
stream_poolsize: 16
log_level: 5
";
        let options = Options::load_default();
        let mut options = options;
        options.load_str(file).unwrap();

        assert_eq!(options.tcp_backlog, 256);
        assert_eq!(options.stream_poolsize, 16);
        assert_eq!(options.log_level, 5);
        assert_eq!(options.tcp_poolsize, 0, "untouched option keeps its default");
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let file = "\
# a comment


tcp_backlog: 64
";
        let mut options = Options::load_default();
        options.load_str(file).unwrap();
        assert_eq!(options.tcp_backlog, 64);
    }

    #[test]
    fn bases_are_auto_detected() {
        assert_eq!(parse_uint("128", 1).unwrap(), 128);
        assert_eq!(parse_uint("0x80", 1).unwrap(), 128);
        assert_eq!(parse_uint("0200", 1).unwrap(), 128);
        assert_eq!(parse_uint("0", 1).unwrap(), 0);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let mut options = Options::load_default();
        let err = options.load_str("bogus_key: 1\n").unwrap_err();
        assert!(matches!(err, Error::UnknownOption(_)));
    }

    #[test]
    fn empty_value_is_rejected_for_every_type() {
        let mut options = Options::load_default();
        let err = options.load_str("log_name:\n").unwrap_err();
        assert!(matches!(err, Error::OptionParse { .. }));

        let mut options = Options::load_default();
        let err = options.load_str("log_name:   \n").unwrap_err();
        assert!(matches!(err, Error::OptionParse { .. }));

        let mut options = Options::load_default();
        let err = options.load_str("tcp_backlog:\n").unwrap_err();
        assert!(matches!(err, Error::OptionParse { .. }));
    }

    #[test]
    fn round_trip_preserves_semantic_value() {
        let mut options = Options::load_default();
        options.load_str("tcp_backlog: 0x100\nlog_name: /var/log/cc.log\n").unwrap();

        let rendered = options.to_config_string();
        let mut reloaded = Options::load_default();
        reloaded.load_str(&rendered).unwrap();

        assert_eq!(reloaded.tcp_backlog, options.tcp_backlog);
        assert_eq!(reloaded.log_name, options.log_name);
    }

    #[test]
    fn load_file_reads_from_disk() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tcp_backlog: 512").unwrap();
        writeln!(file, "log_level: 2").unwrap();

        let options = Options::load_default().load_file(file.path()).unwrap();
        assert_eq!(options.tcp_backlog, 512);
        assert_eq!(options.log_level, 2);
    }
}
