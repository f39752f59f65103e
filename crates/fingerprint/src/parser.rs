//! Line-oriented probe database parser
//!
//! Lines are collected per probe by a two-state machine: `Idle` until the
//! first `Probe` directive, then `Collecting` the lines of the current probe.
//! Every `Probe` directive, and the end of input, flushes the collected
//! lines into a compiled [`Probe`] that is registered immediately.

use std::mem;
use tracing::{info, trace, warn};

use netra_common::NetraResult;

use crate::probe::Probe;
use crate::registry::ProbeRegistry;

/// Replaced with a literal backquote across the whole text before parsing.
pub const BACKQUOTE_MARKER: &str = "${backquote}";

const DIRECTIVES: [&str; 10] = [
    "Exclude",
    "Probe",
    "match",
    "softmatch",
    "ports",
    "sslports",
    "totalwaitms",
    "tcpwrappedms",
    "rarity",
    "fallback",
];

enum ParserState<'a> {
    Idle,
    Collecting(Vec<&'a str>),
}

/// Parse a complete probe database into a registry.
///
/// Fails only on configuration errors: a malformed `Exclude` or a duplicate
/// probe name. Unknown or malformed directives are skipped.
pub fn parse(text: &str) -> NetraResult<ProbeRegistry> {
    let text = text.replace(BACKQUOTE_MARKER, "`");
    let mut registry = ProbeRegistry::new();
    let mut state = ParserState::Idle;

    for (idx, line) in text.lines().enumerate() {
        let Some(directive) = directive_of(line) else {
            continue;
        };

        match directive {
            "Exclude" => {
                let expr = line.trim_start().trim_start_matches("Exclude");
                registry.add_exclude(expr)?;
            }
            "Probe" => {
                if let ParserState::Collecting(lines) = mem::replace(&mut state, ParserState::Collecting(vec![line])) {
                    flush(&mut registry, &lines)?;
                }
            }
            _ => match &mut state {
                ParserState::Collecting(lines) => lines.push(line),
                ParserState::Idle => warn!("line {}: '{}' outside of any Probe, skipped", idx + 1, directive),
            },
        }
    }

    if let ParserState::Collecting(lines) = state {
        flush(&mut registry, &lines)?;
    }

    info!(
        probes = registry.len(),
        excluded_ports = registry.exclude().len(),
        "probe database loaded"
    );
    Ok(registry)
}

fn flush(registry: &mut ProbeRegistry, lines: &[&str]) -> NetraResult<()> {
    match Probe::compile(lines) {
        Ok(probe) => registry.register(probe),
        Err(e) => {
            warn!("dropping probe: {}", e);
            Ok(())
        }
    }
}

/// The directive a line carries, if it is one we understand.
fn directive_of(line: &str) -> Option<&str> {
    if line.len() < 2 || line.starts_with('#') {
        return None;
    }
    let first = line.split_whitespace().next()?;
    if DIRECTIVES.contains(&first) {
        Some(first)
    } else {
        trace!("unknown directive '{}', skipped", first);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netra_common::NetraError;
    use std::sync::Arc;

    const DB: &str = r"
# comment
Exclude T:9100-9107

Probe TCP NULL q||
totalwaitms 6000
match ssh m|^SSH-([\d.]+)-| i/protocol $1/

Probe TCP GenericLines q|\r\n\r\n|
rarity 1
ports 21,80
futuredirective something
match http m|^HTTP/1\.[01] \d\d\d|

Probe TCP GetRequest q|GET / HTTP/1.0\r\n\r\n|
ports 80,8080
sslports 443
fallback GenericLines
";

    fn names(entry: &[Arc<str>]) -> Vec<String> {
        entry.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn parses_probes_in_order() {
        let registry = parse(DB).unwrap();
        assert_eq!(names(registry.probe_names()), vec!["NULL", "GenericLines", "GetRequest"]);
        assert_eq!(registry.probe("GenericLines").unwrap().rules().len(), 1);
        assert_eq!(registry.probe("GetRequest").unwrap().fallback(), ["GenericLines".to_string()]);
        assert!(registry.is_excluded(9104));
        assert_eq!(names(registry.dispatch(80)), vec!["NULL", "GenericLines", "GetRequest"]);
        assert_eq!(names(registry.dispatch(443)), vec!["NULL", "GetRequest"]);
    }

    #[test]
    fn parsing_twice_is_deterministic() {
        let a = parse(DB).unwrap();
        let b = parse(DB).unwrap();
        assert_eq!(names(a.probe_names()), names(b.probe_names()));
        for port in 1..=u16::MAX {
            assert_eq!(a.dispatch(port), b.dispatch(port), "port {}", port);
        }
        assert_eq!(a.exclude(), b.exclude());
    }

    #[test]
    fn exclude_syntax_is_fatal() {
        assert!(parse("Exclude T:9100,1-1024\n").is_ok());
        let err = parse("Exclude !!!\nProbe TCP NULL q||\n").unwrap_err();
        assert!(matches!(err, NetraError::Config(_)));
    }

    #[test]
    fn duplicate_probe_is_fatal() {
        let err = parse("Probe TCP NULL q||\nProbe TCP NULL q|x|\n").unwrap_err();
        assert!(matches!(err, NetraError::DuplicateProbe(_)));
    }

    #[test]
    fn backquote_marker_is_substituted() {
        let registry = parse("Probe TCP Quote q|${backquote}id${backquote}|\n").unwrap();
        assert_eq!(registry.probe("Quote").unwrap().payload(), b"`id`");
    }

    #[test]
    fn stray_and_malformed_lines_are_skipped() {
        let text = "\
ports 80
x
#Probe TCP Hidden q||
Probe TCP
Probe TCP Kept q|k|
ports 22
Probe NOPE Dropped q||
match x m|y|
";
        let registry = parse(text).unwrap();
        assert_eq!(names(registry.probe_names()), vec!["Kept"]);
        assert_eq!(names(registry.dispatch(22)), vec!["Kept"]);
        assert!(registry.dispatch(80).is_empty());
        assert!(registry.probe("Kept").unwrap().rules().is_empty());
    }

    #[test]
    fn empty_input_gives_empty_registry() {
        let registry = parse("").unwrap();
        assert!(registry.is_empty());
        assert!(registry.dispatch(80).is_empty());
    }
}
