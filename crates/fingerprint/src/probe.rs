//! Probe definitions and the per-probe compiler

use std::time::Duration;
use tracing::{trace, warn};

use netra_common::{Finger, NetraError, NetraResult, Protocol};

use crate::port_set::PortSet;
use crate::rule::{split_delimited, MatchRule};

/// One named network interaction: what to send, where it applies and how to
/// read the reply.
#[derive(Debug, Clone)]
pub struct Probe {
    name: String,
    protocol: Protocol,
    payload: Vec<u8>,
    ports: PortSet,
    ssl_ports: PortSet,
    rarity: Option<u8>,
    total_wait: Option<Duration>,
    tcp_wrapped: Option<Duration>,
    fallback: Vec<String>,
    rules: Vec<MatchRule>,
}

impl Probe {
    /// Compile the directive lines collected for one probe. The first line
    /// must be the `Probe` header; a bad header rejects the whole probe,
    /// while a bad body line is logged and skipped.
    pub fn compile(lines: &[&str]) -> NetraResult<Self> {
        let (header, body) = lines
            .split_first()
            .ok_or_else(|| NetraError::Parse("empty probe definition".to_string()))?;
        let mut probe = Self::parse_header(header)?;

        for line in body {
            if let Err(e) = probe.apply_directive(line) {
                warn!("probe {}: skipping line: {}", probe.name, e);
            }
        }
        Ok(probe)
    }

    fn parse_header(line: &str) -> NetraResult<Self> {
        let rest = line
            .trim()
            .strip_prefix("Probe")
            .filter(|r| r.starts_with(char::is_whitespace))
            .ok_or_else(|| NetraError::Parse(format!("not a Probe header: '{}'", line)))?;
        let (protocol, rest) =
            next_token(rest).ok_or_else(|| NetraError::Parse(format!("Probe without protocol: '{}'", line)))?;
        let protocol: Protocol = protocol.parse()?;
        let (name, request) =
            next_token(rest).ok_or_else(|| NetraError::Parse(format!("Probe without name: '{}'", line)))?;
        let request = request.trim_start();

        let raw = request
            .strip_prefix('q')
            .and_then(split_delimited)
            .map(|(inside, _)| inside)
            .ok_or_else(|| NetraError::Parse(format!("Probe {} has no q|...| payload", name)))?;

        Ok(Self {
            name: name.to_string(),
            protocol,
            payload: decode_payload(raw)?,
            ports: PortSet::new(),
            ssl_ports: PortSet::new(),
            rarity: None,
            total_wait: None,
            tcp_wrapped: None,
            fallback: Vec::new(),
            rules: Vec::new(),
        })
    }

    fn apply_directive(&mut self, line: &str) -> NetraResult<()> {
        let line = line.trim();
        let (directive, args) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let args = args.trim();

        match directive {
            "match" | "softmatch" => self.rules.push(MatchRule::compile(line)?),
            "ports" => self.ports.load(args)?,
            "sslports" => self.ssl_ports.load(args)?,
            "rarity" => {
                let rarity = args
                    .parse::<u8>()
                    .ok()
                    .filter(|r| (1..=9).contains(r))
                    .ok_or_else(|| NetraError::Parse(format!("invalid rarity '{}'", args)))?;
                self.rarity = Some(rarity);
            }
            "totalwaitms" => self.total_wait = Some(parse_millis(args)?),
            "tcpwrappedms" => self.tcp_wrapped = Some(parse_millis(args)?),
            "fallback" => {
                self.fallback = args
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
                if self.fallback.is_empty() {
                    return Err(NetraError::Parse("fallback without probe names".to_string()));
                }
            }
            other => trace!("probe {}: ignoring directive '{}'", self.name, other),
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    #[must_use]
    pub fn ports(&self) -> &PortSet {
        &self.ports
    }

    #[inline]
    #[must_use]
    pub fn ssl_ports(&self) -> &PortSet {
        &self.ssl_ports
    }

    #[inline]
    #[must_use]
    pub fn rarity(&self) -> Option<u8> {
        self.rarity
    }

    #[inline]
    #[must_use]
    pub fn total_wait(&self) -> Option<Duration> {
        self.total_wait
    }

    #[inline]
    #[must_use]
    pub fn tcp_wrapped(&self) -> Option<Duration> {
        self.tcp_wrapped
    }

    #[inline]
    #[must_use]
    pub fn fallback(&self) -> &[String] {
        &self.fallback
    }

    #[inline]
    #[must_use]
    pub fn rules(&self) -> &[MatchRule] {
        &self.rules
    }

    /// A probe that names no ports at all applies to every port.
    #[inline]
    #[must_use]
    pub fn is_catch_all(&self) -> bool {
        self.ports.is_empty() && self.ssl_ports.is_empty()
    }

    /// Evaluate this probe's own rules in declaration order.
    #[must_use]
    pub fn match_response(&self, response: &[u8]) -> Option<Finger> {
        self.rules.iter().find_map(|rule| rule.apply(&self.name, response))
    }
}

/// Next whitespace-delimited token and the untouched remainder.
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    Some(s.split_at(end))
}

fn parse_millis(args: &str) -> NetraResult<Duration> {
    args.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| NetraError::Parse(format!("invalid millisecond value '{}'", args)))
}

/// Decode the escape sequences allowed in probe payloads:
/// `\\ \0 \a \b \f \n \r \t \v \xHH`. Any other escaped character stands
/// for itself.
pub(crate) fn decode_payload(raw: &str) -> NetraResult<Vec<u8>> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let esc = *bytes
            .get(i + 1)
            .ok_or_else(|| NetraError::Parse(format!("dangling escape in payload '{}'", raw)))?;
        i += 2;
        match esc {
            b'0' => out.push(0x00),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'x' => {
                let hex = bytes
                    .get(i..i + 2)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| NetraError::Parse(format!("bad \\x escape in payload '{}'", raw)))?;
                out.push(hex);
                i += 2;
            }
            other => out.push(other),
        }
    }
    Ok(out)
}
