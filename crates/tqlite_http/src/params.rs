//! Query-parameter grammar shared by the HTTP handlers.

use std::time::Duration;

use tqlite_command::QueryRequestLevel;

/// Parsed per-request options. An absent parameter means false or default;
/// a flag parameter counts as set even with no value.
#[derive(Debug, Clone, Default)]
pub(crate) struct QueryOpts {
    pub pretty: bool,
    pub timings: bool,
    pub transaction: bool,
    pub no_leader: bool,
    pub non_voters: bool,
    pub q: Option<String>,
    pub fmt: Option<String>,
    pub level: Option<String>,
    pub freshness: Option<String>,
    pub timeout: Option<String>,
}

impl QueryOpts {
    pub fn parse(raw: Option<&str>) -> QueryOpts {
        let mut opts = QueryOpts::default();
        let Some(raw) = raw else { return opts };
        for (k, v) in url::form_urlencoded::parse(raw.as_bytes()) {
            match k.as_ref() {
                "pretty" => opts.pretty = true,
                "timings" => opts.timings = true,
                "transaction" => opts.transaction = true,
                "noleader" => opts.no_leader = true,
                "nonvoters" => opts.non_voters = true,
                "q" => opts.q = Some(v.trim().to_string()),
                "fmt" => opts.fmt = Some(v.trim().to_string()),
                "level" => opts.level = Some(v.trim().to_string()),
                "freshness" => opts.freshness = Some(v.trim().to_string()),
                "timeout" => opts.timeout = Some(v.trim().to_string()),
                _ => {}
            }
        }
        opts
    }

    /// Requested read-consistency level. Unknown values coerce to weak,
    /// which existing clients depend on.
    pub fn level(&self) -> QueryRequestLevel {
        match self.level.as_deref() {
            Some(s) if s.eq_ignore_ascii_case("none") => QueryRequestLevel::None,
            Some(s) if s.eq_ignore_ascii_case("strong") => QueryRequestLevel::Strong,
            _ => QueryRequestLevel::Weak,
        }
    }

    /// Maximum staleness for stale reads; zero disables. An invalid value
    /// is an error (400 at the handler).
    pub fn freshness(&self) -> Result<Duration, DurationParseError> {
        match self.freshness.as_deref() {
            None | Some("") => Ok(Duration::ZERO),
            Some(s) => parse_duration(s),
        }
    }

    /// Per-operation timeout for `/nodes` probes. An invalid value silently
    /// falls back to `default`, matching the existing API.
    pub fn timeout(&self, default: Duration) -> Duration {
        match self.timeout.as_deref() {
            None | Some("") => default,
            Some(s) => parse_duration(s).unwrap_or(default),
        }
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
#[error("invalid duration {0:?}")]
pub(crate) struct DurationParseError(pub String);

/// Parse Go-style duration literals: a decimal number followed by a unit,
/// optionally repeated ("150ms", "1.5s", "1m30s"). Units: ns, us, ms, s,
/// m, h.
pub(crate) fn parse_duration(s: &str) -> Result<Duration, DurationParseError> {
    let err = || DurationParseError(s.to_string());
    if s.is_empty() {
        return Err(err());
    }

    let mut rest = s;
    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(err)?;
        if num_end == 0 {
            return Err(err());
        }
        let value: f64 = rest[..num_end].parse().map_err(|_| err())?;

        let unit_rest = &rest[num_end..];
        let (secs_per_unit, consumed) = if unit_rest.starts_with("ns") {
            (1e-9, 2)
        } else if unit_rest.starts_with("us") {
            (1e-6, 2)
        } else if unit_rest.starts_with("µs") {
            (1e-6, "µs".len())
        } else if unit_rest.starts_with("ms") {
            (1e-3, 2)
        } else if unit_rest.starts_with('s') {
            (1.0, 1)
        } else if unit_rest.starts_with('m') {
            (60.0, 1)
        } else if unit_rest.starts_with('h') {
            (3600.0, 1)
        } else {
            return Err(err());
        };

        total += Duration::try_from_secs_f64(value * secs_per_unit).map_err(|_| err())?;
        rest = &unit_rest[consumed..];
    }
    Ok(total)
}
