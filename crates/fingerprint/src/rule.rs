//! `match` / `softmatch` rules
//!
//! A rule line looks like
//!
//! ```text
//! match ssh m|^SSH-([\d.]+)-OpenSSH_([\w._-]+)\r?\n|i p/OpenSSH/ v/$2/ i/protocol $1/
//! ```
//!
//! The pattern is compiled once at load time into a byte regex with Unicode
//! disabled, so `\xHH` escapes match raw response bytes. The trailing
//! version-info text is compiled into an ordered list of field templates
//! whose `$n` references are bound to capture-group indices.

use regex::bytes::{Captures, Regex, RegexBuilder};
use tracing::trace;

use netra_common::{Finger, NetraError, NetraResult};

/// Hard rules identify a service outright; soft rules only narrow it down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Hard,
    Soft,
}

/// Finger field a template slot renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Product,
    Version,
    Info,
    Hostname,
    Os,
    DeviceType,
    Cpe,
}

impl Field {
    fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'p' => Some(Field::Product),
            'v' => Some(Field::Version),
            'i' => Some(Field::Info),
            'h' => Some(Field::Hostname),
            'o' => Some(Field::Os),
            'd' => Some(Field::DeviceType),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `$n`
    Group(usize),
    /// `$P(n)`: printable ASCII only
    Printable(usize),
    /// `$SUBST(n,"from","to")`
    Subst { group: usize, from: String, to: String },
    /// `$I(n,">")` / `$I(n,"<")`
    Int { group: usize, big_endian: bool },
}

/// One field value with its capture-group placeholders resolved at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    fn parse(text: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = text;

        while let Some(idx) = rest.find('$') {
            literal.push_str(&rest[..idx]);
            let tail = &rest[idx + 1..];
            match parse_placeholder(tail) {
                Some((segment, consumed)) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                    rest = &tail[consumed..];
                }
                None => {
                    literal.push('$');
                    rest = tail;
                }
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Self { segments }
    }

    /// Highest capture group referenced by this template.
    fn max_group(&self) -> usize {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(_) => 0,
                Segment::Group(g) | Segment::Printable(g) => *g,
                Segment::Subst { group, .. } | Segment::Int { group, .. } => *group,
            })
            .max()
            .unwrap_or(0)
    }

    fn render(&self, caps: &Captures<'_>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Group(g) => {
                    if let Some(m) = caps.get(*g) {
                        out.push_str(&String::from_utf8_lossy(m.as_bytes()));
                    }
                }
                Segment::Printable(g) => {
                    if let Some(m) = caps.get(*g) {
                        out.extend(
                            m.as_bytes()
                                .iter()
                                .filter(|b| (0x20..=0x7e).contains(*b))
                                .map(|b| *b as char),
                        );
                    }
                }
                Segment::Subst { group, from, to } => {
                    if let Some(m) = caps.get(*group) {
                        let value = String::from_utf8_lossy(m.as_bytes());
                        out.push_str(&value.replace(from.as_str(), to));
                    }
                }
                Segment::Int { group, big_endian } => {
                    if let Some(m) = caps.get(*group) {
                        let bytes = m.as_bytes();
                        let bytes = &bytes[..bytes.len().min(8)];
                        let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
                        let value = if *big_endian {
                            bytes.iter().fold(0u64, fold)
                        } else {
                            bytes.iter().rev().fold(0u64, fold)
                        };
                        out.push_str(&value.to_string());
                    }
                }
            }
        }
        out
    }
}

/// Parse the text following a `$`. Returns the segment and the number of
/// bytes consumed.
fn parse_placeholder(tail: &str) -> Option<(Segment, usize)> {
    let first = tail.chars().next()?;
    if let Some(d) = first.to_digit(10) {
        return Some((Segment::Group(d as usize), 1));
    }

    if let Some(args) = tail.strip_prefix("P(") {
        let close = args.find(')')?;
        let group = args[..close].trim().parse().ok()?;
        return Some((Segment::Printable(group), 2 + close + 1));
    }

    if let Some(args) = tail.strip_prefix("SUBST(") {
        let close = args.find("\")")?;
        let inner = &args[..close + 1];
        let (group, rest) = inner.split_once(',')?;
        let group = group.trim().parse().ok()?;
        let (from, rest) = parse_quoted(rest.trim_start())?;
        let rest = rest.trim_start().strip_prefix(',')?;
        let (to, _) = parse_quoted(rest.trim_start())?;
        return Some((Segment::Subst { group, from, to }, 6 + close + 2));
    }

    if let Some(args) = tail.strip_prefix("I(") {
        let close = args.find(')')?;
        let (group, order) = args[..close].split_once(',')?;
        let group = group.trim().parse().ok()?;
        let big_endian = match order.trim() {
            "\">\"" => true,
            "\"<\"" => false,
            _ => return None,
        };
        return Some((Segment::Int { group, big_endian }, 2 + close + 1));
    }

    None
}

fn parse_quoted(s: &str) -> Option<(String, &str)> {
    let body = s.strip_prefix('"')?;
    let end = body.find('"')?;
    Some((body[..end].to_string(), &body[end + 1..]))
}

/// Split `<d>inside<d>rest` on the first delimiter character.
pub(crate) fn split_delimited(s: &str) -> Option<(&str, &str)> {
    let delim = s.chars().next()?;
    let body = &s[delim.len_utf8()..];
    let end = body.find(delim)?;
    Some((&body[..end], &body[end + delim.len_utf8()..]))
}

fn parse_version_info(text: &str) -> Vec<(Field, Template)> {
    let mut fields = Vec::new();
    let mut rest = text.trim_start();

    while !rest.is_empty() {
        let (field, after_tag) = if let Some(after) = rest.strip_prefix("cpe:") {
            (Some(Field::Cpe), after)
        } else {
            let mut chars = rest.chars();
            let tag = chars.next().and_then(Field::from_tag);
            let delim_ok = chars
                .next()
                .map_or(false, |c| !c.is_alphanumeric() && !c.is_whitespace());
            if tag.is_some() && delim_ok {
                (tag, &rest[1..])
            } else {
                (None, rest)
            }
        };

        let Some(field) = field else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            trace!("skipping unknown version-info word '{}'", &rest[..end]);
            rest = rest[end..].trim_start();
            continue;
        };

        let Some((inside, after)) = split_delimited(after_tag) else {
            trace!("unterminated version-info field '{}'", rest);
            break;
        };
        fields.push((field, Template::parse(inside)));

        let after = if field == Field::Cpe {
            after.strip_prefix('a').unwrap_or(after)
        } else {
            after
        };
        rest = after.trim_start();
    }
    fields
}

/// A compiled `match` or `softmatch` directive.
#[derive(Debug, Clone)]
pub struct MatchRule {
    service: String,
    kind: RuleKind,
    pattern: Regex,
    fields: Vec<(Field, Template)>,
}

impl MatchRule {
    /// Compile a full `match ...` / `softmatch ...` line.
    pub fn compile(line: &str) -> NetraResult<Self> {
        let (directive, rest) = line
            .trim()
            .split_once(char::is_whitespace)
            .ok_or_else(|| NetraError::Parse(format!("incomplete rule '{}'", line)))?;
        let kind = match directive {
            "match" => RuleKind::Hard,
            "softmatch" => RuleKind::Soft,
            other => return Err(NetraError::Parse(format!("not a rule directive '{}'", other))),
        };

        let rest = rest.trim_start();
        let (service, rest) = rest
            .split_once(char::is_whitespace)
            .ok_or_else(|| NetraError::Parse(format!("rule without pattern '{}'", line)))?;

        let rest = rest
            .trim_start()
            .strip_prefix('m')
            .ok_or_else(|| NetraError::Parse(format!("rule pattern must start with 'm' in '{}'", line)))?;
        let (pattern, after) = split_delimited(rest)
            .ok_or_else(|| NetraError::Parse(format!("unterminated rule pattern in '{}'", line)))?;

        let flags_end = after.find(char::is_whitespace).unwrap_or(after.len());
        let (flags, version_info) = after.split_at(flags_end);

        let mut builder = RegexBuilder::new(pattern);
        builder.unicode(false).octal(true);
        for flag in flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                other => {
                    return Err(NetraError::Parse(format!("unknown rule flag '{}' in '{}'", other, line)));
                }
            }
        }
        let pattern = builder
            .build()
            .map_err(|e| NetraError::Parse(format!("bad rule pattern for {}: {}", service, e)))?;

        let fields = parse_version_info(version_info);
        if let Some(max) = fields.iter().map(|(_, t)| t.max_group()).max() {
            if max >= pattern.captures_len() {
                trace!("rule for {} references group ${} beyond its captures", service, max);
            }
        }

        Ok(Self {
            service: service.to_string(),
            kind,
            pattern,
            fields,
        })
    }

    #[inline]
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn is_match(&self, response: &[u8]) -> bool {
        self.pattern.is_match(response)
    }

    /// Match against a raw response and render a Finger attributed to `probe`.
    #[must_use]
    pub fn apply(&self, probe: &str, response: &[u8]) -> Option<Finger> {
        let caps = self.pattern.captures(response)?;
        let mut finger = Finger::new(probe, self.service.as_str()).with_soft(self.kind == RuleKind::Soft);

        for (field, template) in &self.fields {
            let value = template.render(&caps);
            if value.is_empty() {
                continue;
            }
            match field {
                Field::Product => finger.product = Some(value),
                Field::Version => finger.version = Some(value),
                Field::Info => finger.info = Some(value),
                Field::Hostname => finger.hostname = Some(value),
                Field::Os => finger.os = Some(value),
                Field::DeviceType => finger.device_type = Some(value),
                Field::Cpe => finger.cpe.push(value),
            }
        }
        Some(finger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openssh_rule_extracts_fields() {
        let rule = MatchRule::compile(
            r"match ssh m|^SSH-([\d.]+)-OpenSSH_([\w._-]+)\r?\n|i p/OpenSSH/ v/$2/ i/protocol $1/ cpe:/a:openbsd:openssh:$2/a",
        )
        .unwrap();
        assert_eq!(rule.kind(), RuleKind::Hard);
        assert_eq!(rule.service(), "ssh");

        let finger = rule.apply("NULL", b"SSH-2.0-OpenSSH_8.2p1\r\n").unwrap();
        assert_eq!(finger.probe, "NULL");
        assert_eq!(finger.service, "ssh");
        assert_eq!(finger.product.as_deref(), Some("OpenSSH"));
        assert_eq!(finger.version.as_deref(), Some("8.2p1"));
        assert_eq!(finger.info.as_deref(), Some("protocol 2.0"));
        assert_eq!(finger.cpe, vec!["a:openbsd:openssh:8.2p1".to_string()]);
        assert!(!finger.soft);
    }

    #[test]
    fn flags_control_matching() {
        let rule = MatchRule::compile(r"match http m|^http/1\.[01] \d\d\d|i").unwrap();
        assert!(rule.is_match(b"HTTP/1.1 200 OK\r\n"));

        let dotall = MatchRule::compile(r"match http m|^HTTP.*Server: nginx|s p/nginx/").unwrap();
        assert!(dotall.is_match(b"HTTP/1.1 200 OK\r\nServer: nginx\r\n"));
        let plain = MatchRule::compile(r"match http m|^HTTP.*Server: nginx| p/nginx/").unwrap();
        assert!(!plain.is_match(b"HTTP/1.1 200 OK\r\nServer: nginx\r\n"));
    }

    #[test]
    fn raw_bytes_and_nul_escapes() {
        let rule = MatchRule::compile(r"match mysql m|^.\0\0\0\x0a([\w.-]+)\0| p/MySQL/ v/$1/").unwrap();
        let mut response = vec![0x4a, 0, 0, 0, 0x0a];
        response.extend_from_slice(b"8.0.36\0");
        response.extend_from_slice(&[0xff, 0xfe]);
        let finger = rule.apply("NULL", &response).unwrap();
        assert_eq!(finger.version.as_deref(), Some("8.0.36"));

        let high = MatchRule::compile(r"match telnet m|^\xff\xfb\x01|").unwrap();
        assert!(high.is_match(&[0xff, 0xfb, 0x01, 0x00]));
    }

    #[test]
    fn softmatch_sets_soft_flag() {
        let rule = MatchRule::compile(r"softmatch ftp m|^220 |").unwrap();
        assert_eq!(rule.kind(), RuleKind::Soft);
        assert!(rule.apply("NULL", b"220 ready\r\n").unwrap().soft);
    }

    #[test]
    fn helper_substitutions() {
        let rule = MatchRule::compile(
            r#"match x m|^V(\d+_\d+) N([^\r]+)\r\nL(..)| v/$SUBST(1,"_",".")/ h/$P(2)/ i/len $I(3,">")/ o/$I(3,"<")/"#,
        )
        .unwrap();
        let finger = rule.apply("P", b"V2_14 Nbox\x01one\r\nL\x01\x02").unwrap();
        assert_eq!(finger.version.as_deref(), Some("2.14"));
        assert_eq!(finger.hostname.as_deref(), Some("boxone"));
        assert_eq!(finger.info.as_deref(), Some("len 258"));
        assert_eq!(finger.os.as_deref(), Some("513"));
    }

    #[test]
    fn alternate_delimiters_and_unknown_words() {
        let rule = MatchRule::compile(r"match http m=^HTTP/1\.[01] \d\d\d=s product p|Apache| d/router/").unwrap();
        let finger = rule.apply("GetRequest", b"HTTP/1.0 404 Not Found\r\n").unwrap();
        assert_eq!(finger.product.as_deref(), Some("Apache"));
        assert_eq!(finger.device_type.as_deref(), Some("router"));
    }

    #[test]
    fn empty_rendered_fields_are_dropped() {
        let rule = MatchRule::compile(r"match ftp m|^220 (\w+)?ready| p/$1/ v/1.0/").unwrap();
        let finger = rule.apply("NULL", b"220 ready").unwrap();
        assert!(finger.product.is_none());
        assert_eq!(finger.version.as_deref(), Some("1.0"));
    }

    #[test]
    fn malformed_rules_fail() {
        assert!(MatchRule::compile("match").is_err());
        assert!(MatchRule::compile("match ssh").is_err());
        assert!(MatchRule::compile(r"match ssh q|^SSH|").is_err());
        assert!(MatchRule::compile(r"match ssh m|^SSH").is_err());
        assert!(MatchRule::compile(r"match ssh m|^SSH|x").is_err());
        assert!(MatchRule::compile(r"match ssh m|(unclosed|").is_err());
        assert!(MatchRule::compile(r"ports ssh m|^SSH|").is_err());
    }

    #[test]
    fn first_capture_wins_on_no_match() {
        let rule = MatchRule::compile(r"match ssh m|^SSH-|").unwrap();
        assert!(rule.apply("NULL", b"HTTP/1.1 200 OK").is_none());
    }
}
