//! Command surface parsing (C10).
//!
//! The engine is driven by a small text protocol: one verb plus a single
//! opaque argument string, the same shape whether it arrives from a script
//! file, a REPL, or a host's own debug console. This module owns splitting
//! a raw line into a [`Command`] and the two argument grammars every verb
//! handler needs — base-prefixed integers and booleans — so `engine.rs`'s
//! verb table can stay a plain `match` over already-parsed values.

/// One parsed command: a verb and its raw (unparsed) argument string.
///
/// `arg` is empty, never absent, for verbs that take no argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The command verb, exactly as written (case-sensitive).
    pub verb: String,
    /// Everything after the verb and its separating whitespace, trimmed.
    pub arg: String,
}

impl Command {
    /// Splits `line` on the first run of whitespace into a verb and an
    /// argument. Leading/trailing whitespace on both is trimmed; an empty
    /// or all-whitespace `line` yields an empty verb.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => Self {
                verb: verb.to_owned(),
                arg: rest.trim().to_owned(),
            },
            None => Self {
                verb: line.to_owned(),
                arg: String::new(),
            },
        }
    }
}

/// Parses a base-prefixed, unsigned 64-bit integer argument.
///
/// Recognizes `0x`/`0X` (hex), `0o`/`0O` (octal), `0b`/`0B` (binary); any
/// other string is parsed as base-10. Returns `None` on a malformed
/// argument rather than panicking, so callers can turn it into a
/// [`SniffError::InvalidArgument`](crate::common::SniffError::InvalidArgument).
#[must_use]
pub fn parse_uint(arg: &str) -> Option<u64> {
    let arg = arg.trim();
    if let Some(rest) = arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        u64::from_str_radix(rest, 16).ok()
    } else if let Some(rest) = arg.strip_prefix("0o").or_else(|| arg.strip_prefix("0O")) {
        u64::from_str_radix(rest, 8).ok()
    } else if let Some(rest) = arg.strip_prefix("0b").or_else(|| arg.strip_prefix("0B")) {
        u64::from_str_radix(rest, 2).ok()
    } else {
        arg.parse().ok()
    }
}

/// Parses a boolean argument: `"true"`/`"1"`/`"on"` → `true`,
/// `"false"`/`"0"`/`"off"` → `false`, case-insensitively; anything else is
/// `None`.
#[must_use]
pub fn parse_bool(arg: &str) -> Option<bool> {
    match arg.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" => Some(true),
        "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Splits a whitespace-separated argument string into its parts, trimming
/// each. Used by verbs that take more than one value (e.g. `addsniffing`'s
/// `addr size step match`).
#[must_use]
pub fn split_args(arg: &str) -> Vec<&str> {
    arg.split_whitespace().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parse_splits_verb_and_argument() {
        let cmd = Command::parse("  addbreakpoint 0x1000  ");
        assert_eq!(cmd.verb, "addbreakpoint");
        assert_eq!(cmd.arg, "0x1000");
    }

    #[test]
    fn parse_handles_bare_verb() {
        let cmd = Command::parse("cleartrace");
        assert_eq!(cmd.verb, "cleartrace");
        assert_eq!(cmd.arg, "");
    }

    #[rstest]
    #[case("0x1F", Some(31))]
    #[case("0o17", Some(15))]
    #[case("0b101", Some(5))]
    #[case("42", Some(42))]
    #[case("nope", None)]
    fn parse_uint_respects_base_prefix(#[case] input: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_uint(input), expected);
    }

    #[rstest]
    #[case("true", Some(true))]
    #[case("0", Some(false))]
    #[case("ON", Some(true))]
    #[case("maybe", None)]
    fn parse_bool_accepts_known_spellings(#[case] input: &str, #[case] expected: Option<bool>) {
        assert_eq!(parse_bool(input), expected);
    }

    #[test]
    fn split_args_trims_and_splits_on_whitespace() {
        assert_eq!(split_args("0x100   8  4 0"), vec!["0x100", "8", "4", "0"]);
    }
}
