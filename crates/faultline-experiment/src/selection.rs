//! Target selection modes: `ALL`, `COUNT(n)` and `PERCENT(p)`.

use std::fmt;
use std::str::FromStr;

/// How many of the matching resources a target selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// Every matching resource.
    All,
    /// The first `n` resources by id.
    Count(u64),
    /// `ceil(p / 100 * candidates)` resources by id, `0 <= p <= 100`.
    Percent(u8),
}

impl SelectionMode {
    /// Number of resources selected out of `candidates`.
    pub fn select_count(&self, candidates: usize) -> usize {
        match *self {
            SelectionMode::All => candidates,
            SelectionMode::Count(n) => usize::try_from(n).unwrap_or(usize::MAX).min(candidates),
            SelectionMode::Percent(p) => (candidates * p as usize).div_ceil(100),
        }
    }

    /// Whether this mode can never select anything (`COUNT(0)` / `PERCENT(0)`).
    pub fn is_zero(&self) -> bool {
        matches!(self, SelectionMode::Count(0) | SelectionMode::Percent(0))
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionMode::All => write!(f, "ALL"),
            SelectionMode::Count(n) => write!(f, "COUNT({n})"),
            SelectionMode::Percent(p) => write!(f, "PERCENT({p})"),
        }
    }
}

impl FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "ALL" {
            return Ok(SelectionMode::All);
        }

        let (keyword, arg) = s
            .strip_suffix(')')
            .and_then(|rest| rest.split_once('('))
            .ok_or_else(|| "expected ALL, COUNT(n) or PERCENT(p)".to_string())?;
        let arg = arg.trim();

        match keyword.trim() {
            "COUNT" => arg
                .parse::<u64>()
                .map(SelectionMode::Count)
                .map_err(|_| format!("COUNT expects a non-negative integer, got '{arg}'")),
            "PERCENT" => {
                let p = arg
                    .parse::<u8>()
                    .map_err(|_| format!("PERCENT expects an integer 0-100, got '{arg}'"))?;
                if p > 100 {
                    return Err(format!("PERCENT must be at most 100, got {p}"));
                }
                Ok(SelectionMode::Percent(p))
            }
            other => Err(format!("unknown selection keyword '{other}'")),
        }
    }
}
