//! Port-range sets used by `ports`, `sslports` and `Exclude` directives

use std::fmt;
use std::str::FromStr;

use netra_common::{NetraError, NetraResult};

const WORDS: usize = 65536 / 64;

/// Membership over ports 1-65535 with a "fill" flag for catch-all probes.
///
/// Backed by a fixed bitset so `contains` is a single word lookup.
#[derive(Clone, PartialEq, Eq)]
pub struct PortSet {
    bits: Box<[u64]>,
    filled: bool,
}

impl PortSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bits: vec![0u64; WORDS].into_boxed_slice(),
            filled: false,
        }
    }

    /// Parse a complete expression such as `T:9100-9107,80,1-1024`.
    pub fn parse(expr: &str) -> NetraResult<Self> {
        let mut set = Self::new();
        set.load(expr)?;
        Ok(set)
    }

    /// Add every term of a comma-separated expression. Terms are a single
    /// port or an inclusive range, optionally prefixed with a transport
    /// qualifier (`T:`, `U:` or `S:`). Any malformed term fails the whole
    /// expression and leaves `self` untouched.
    pub fn load(&mut self, expr: &str) -> NetraResult<()> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(NetraError::Parse("empty port expression".to_string()));
        }

        let mut ranges = Vec::new();
        for term in expr.split(',') {
            ranges.push(parse_term(term)?);
        }
        for (start, end) in ranges {
            for port in start..=end {
                self.insert(port);
            }
        }
        Ok(())
    }

    /// Make the set contain every port.
    #[inline]
    pub fn fill(&mut self) {
        self.filled = true;
    }

    #[inline]
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.filled
    }

    #[inline]
    pub fn insert(&mut self, port: u16) {
        if port != 0 {
            self.bits[port as usize / 64] |= 1u64 << (port % 64);
        }
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, port: u16) -> bool {
        port != 0 && (self.filled || self.bits[port as usize / 64] & (1u64 << (port % 64)) != 0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        if self.filled {
            return 65535;
        }
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.filled && self.bits.iter().all(|w| *w == 0)
    }

    /// Member ports in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        (1..=u16::MAX).filter(move |p| self.contains(*p))
    }
}

fn parse_term(term: &str) -> NetraResult<(u16, u16)> {
    let raw = term.trim();
    let body = match raw.split_once(':') {
        Some((qualifier, rest)) => {
            if !matches!(qualifier.trim(), "T" | "U" | "S" | "t" | "u" | "s") {
                return Err(NetraError::Parse(format!("invalid transport qualifier in '{}'", raw)));
            }
            rest.trim()
        }
        None => raw,
    };

    match body.split_once('-') {
        Some((start, end)) => {
            let start = parse_port(start, raw)?;
            let end = parse_port(end, raw)?;
            if start > end {
                return Err(NetraError::Parse(format!("reversed port range '{}'", raw)));
            }
            Ok((start, end))
        }
        None => {
            let port = parse_port(body, raw)?;
            Ok((port, port))
        }
    }
}

fn parse_port(s: &str, term: &str) -> NetraResult<u16> {
    match s.trim().parse::<u16>() {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(NetraError::Parse(format!("invalid port term '{}'", term))),
    }
}

impl Default for PortSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for PortSet {
    type Err = NetraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for PortSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortSet")
            .field("filled", &self.filled)
            .field("len", &self.len())
            .finish()
    }
}
