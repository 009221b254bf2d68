//! Extraction filter: name pattern and size threshold

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::{Result, SalvageError};
use crate::skiplog::SkipReason;

/// Direction of a size threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizePolarity {
    /// Accept `size <= threshold`
    AtMost,
    /// Accept `size > threshold`
    AtLeast,
}

/// Size threshold with polarity, written `(+|-)N[KMGT]` on the command
/// line: `+` means "at least", `-` means "at most"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeRule {
    pub threshold: u64,
    pub polarity: SizePolarity,
}

impl SizeRule {
    pub fn at_most(threshold: u64) -> Self {
        Self {
            threshold,
            polarity: SizePolarity::AtMost,
        }
    }

    pub fn at_least(threshold: u64) -> Self {
        Self {
            threshold,
            polarity: SizePolarity::AtLeast,
        }
    }
}

impl FromStr for SizeRule {
    type Err = SalvageError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SalvageError::InvalidSizeRule(s.to_string());

        let polarity = match s.chars().next() {
            Some('+') => SizePolarity::AtLeast,
            Some('-') => SizePolarity::AtMost,
            _ => return Err(invalid()),
        };
        let body = &s[1..];

        let (digits, shift) = match body.chars().last().map(|c| c.to_ascii_uppercase()) {
            Some('T') => (&body[..body.len() - 1], 40),
            Some('G') => (&body[..body.len() - 1], 30),
            Some('M') => (&body[..body.len() - 1], 20),
            Some('K') => (&body[..body.len() - 1], 10),
            _ => (body, 0),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let value: u64 = digits.parse().map_err(|_| invalid())?;
        let threshold = value.checked_mul(1u64 << shift).ok_or_else(invalid)?;
        Ok(Self {
            threshold,
            polarity,
        })
    }
}

impl fmt::Display for SizeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.polarity {
            SizePolarity::AtMost => write!(f, "at most {} bytes", self.threshold),
            SizePolarity::AtLeast => write!(f, "more than {} bytes", self.threshold),
        }
    }
}

/// Which files to extract. The default accepts everything.
#[derive(Debug, Clone, Default)]
pub struct FilterRules {
    /// Must match at the start of the file name
    pub name_pattern: Option<Regex>,
    pub size: Option<SizeRule>,
}

impl FilterRules {
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        self.name_pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn with_size_rule(mut self, rule: SizeRule) -> Self {
        self.size = Some(rule);
        self
    }
}

/// Verdict for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    RejectNoMatch,
    RejectTooLarge,
    RejectTooSmall,
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept)
    }

    /// Reason to log for a rejection
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Decision::Accept => None,
            Decision::RejectNoMatch => Some(SkipReason::NoMatch),
            Decision::RejectTooLarge => Some(SkipReason::TooLarge),
            Decision::RejectTooSmall => Some(SkipReason::TooSmall),
        }
    }
}

/// Decide whether a file named `name` with `size` bytes gets extracted.
/// The name is checked before the size.
pub fn accept(name: &str, size: u64, rules: &FilterRules) -> Decision {
    if let Some(pattern) = &rules.name_pattern {
        let anchored = pattern.find(name).map_or(false, |m| m.start() == 0);
        if !anchored {
            return Decision::RejectNoMatch;
        }
    }

    match rules.size {
        Some(SizeRule {
            threshold,
            polarity: SizePolarity::AtMost,
        }) if size > threshold => Decision::RejectTooLarge,
        Some(SizeRule {
            threshold,
            polarity: SizePolarity::AtLeast,
        }) if size <= threshold => Decision::RejectTooSmall,
        _ => Decision::Accept,
    }
}
