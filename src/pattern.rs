//! Single-segment wildcard patterns over dot-delimited metric keys.
//!
//! `*` stands for exactly one non-empty segment, so `cpu.*.percentage`
//! matches `cpu.0.percentage` but neither `cpu.percentage` nor
//! `cpu.0.1.percentage`. Patterns are compiled once into an anchored regex.

use std::fmt::{self, Display, Formatter};

use regex::Regex;

use crate::error::PatternError;

/// A compiled wildcard pattern.
#[derive(Debug, Clone)]
pub struct WildcardPattern {
    source: String,
    matcher: Regex,
}

impl WildcardPattern {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let mut expr = String::with_capacity(pattern.len() * 2 + 2);
        expr.push('^');
        for (i, segment) in pattern.split('.').enumerate() {
            if segment.is_empty() {
                return Err(PatternError::EmptySegment {
                    pattern: pattern.to_string(),
                });
            }
            if i > 0 {
                expr.push_str(r"\.");
            }
            if segment == "*" {
                expr.push_str(r"[^.]+");
            } else {
                // A `*` inside a segment spans characters within that segment only.
                let parts: Vec<String> = segment.split('*').map(regex::escape).collect();
                expr.push_str(&parts.join(r"[^.]*"));
            }
        }
        expr.push('$');

        let matcher = Regex::new(&expr).map_err(|e| PatternError::Invalid {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            source: pattern.to_string(),
            matcher,
        })
    }

    #[inline]
    pub fn matches(&self, key: &str) -> bool {
        self.matcher.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when the pattern contains no wildcard and matches one key only.
    pub fn is_literal(&self) -> bool {
        !self.source.contains('*')
    }
}

impl Display for WildcardPattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for WildcardPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for WildcardPattern {}
