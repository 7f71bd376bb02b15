//! Label matchers: `=`, `!=`, `=~` and `!~`.

use std::fmt;

use alerting_core::Labels;
use regex::Regex;

use crate::error::{NotifyError, Result};
use crate::models::MatcherSpec;

/// How a matcher compares a label value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `=~`
    Regex,
    /// `!~`
    NotRegex,
}

impl MatchType {
    /// Returns the operator symbol.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regex => "=~",
            Self::NotRegex => "!~",
        }
    }

    const fn is_regex(self) -> bool {
        matches!(self, Self::Regex | Self::NotRegex)
    }

    const fn is_negative(self) -> bool {
        matches!(self, Self::NotEqual | Self::NotRegex)
    }
}

/// A compiled label matcher. A missing label matches as the empty string.
#[derive(Debug, Clone)]
pub struct Matcher {
    name: String,
    value: String,
    match_type: MatchType,
    regex: Option<Regex>,
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value && self.match_type == other.match_type
    }
}

impl Eq for Matcher {}

impl Matcher {
    /// Creates a matcher, compiling the pattern of regex matchers.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::InvalidMatcher` if the name is empty or the
    /// pattern does not compile.
    pub fn new(name: impl Into<String>, match_type: MatchType, value: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        if name.is_empty() {
            return Err(NotifyError::InvalidMatcher {
                matcher: format!("{}{value:?}", match_type.as_str()),
                reason: "label name cannot be empty".to_string(),
            });
        }
        let regex = if match_type.is_regex() {
            let anchored = format!("^(?:{value})$");
            Some(Regex::new(&anchored).map_err(|e| NotifyError::InvalidMatcher {
                matcher: format!("{name}{}{value:?}", match_type.as_str()),
                reason: e.to_string(),
            })?)
        } else {
            None
        };
        Ok(Self {
            name,
            value,
            match_type,
            regex,
        })
    }

    /// Parses `name<op>"value"`. The value may also be unquoted.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::InvalidMatcher` on malformed input.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| NotifyError::InvalidMatcher {
            matcher: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        let op_start = trimmed
            .find(['=', '!'])
            .ok_or_else(|| invalid("missing operator"))?;
        let name = trimmed[..op_start].trim();
        let rest = &trimmed[op_start..];
        let (match_type, value) = if let Some(v) = rest.strip_prefix("=~") {
            (MatchType::Regex, v)
        } else if let Some(v) = rest.strip_prefix("!~") {
            (MatchType::NotRegex, v)
        } else if let Some(v) = rest.strip_prefix("!=") {
            (MatchType::NotEqual, v)
        } else if let Some(v) = rest.strip_prefix('=') {
            (MatchType::Equal, v)
        } else {
            return Err(invalid("unknown operator"));
        };

        let value = value.trim();
        let value = match value.strip_prefix('"') {
            Some(quoted) => quoted
                .strip_suffix('"')
                .ok_or_else(|| invalid("unterminated quoted value"))?
                .replace("\\\"", "\"")
                .replace("\\\\", "\\"),
            None => value.to_string(),
        };
        Self::new(name, match_type, value)
    }

    /// Builds a matcher from its wire form.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::InvalidMatcher` if the pattern does not compile.
    pub fn from_spec(spec: &MatcherSpec) -> Result<Self> {
        let match_type = match (spec.is_regex, spec.is_equal) {
            (false, true) => MatchType::Equal,
            (false, false) => MatchType::NotEqual,
            (true, true) => MatchType::Regex,
            (true, false) => MatchType::NotRegex,
        };
        Self::new(spec.name.clone(), match_type, spec.value.clone())
    }

    /// The wire form of this matcher.
    #[must_use]
    pub fn to_spec(&self) -> MatcherSpec {
        MatcherSpec {
            name: self.name.clone(),
            value: self.value.clone(),
            is_regex: self.match_type.is_regex(),
            is_equal: !self.match_type.is_negative(),
        }
    }

    /// Label name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value or pattern.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Match type.
    #[must_use]
    pub const fn match_type(&self) -> MatchType {
        self.match_type
    }

    /// Tests a single value.
    #[must_use]
    pub fn matches_value(&self, value: &str) -> bool {
        match (self.match_type, &self.regex) {
            (MatchType::Equal, _) => value == self.value,
            (MatchType::NotEqual, _) => value != self.value,
            (MatchType::Regex, Some(re)) => re.is_match(value),
            (MatchType::NotRegex, Some(re)) => !re.is_match(value),
            (_, None) => false,
        }
    }

    /// Tests a label set.
    #[must_use]
    pub fn matches(&self, labels: &Labels) -> bool {
        self.matches_value(labels.get(&self.name).unwrap_or_default())
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.match_type.as_str(), self.value)
    }
}

/// A conjunction of matchers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matchers(Vec<Matcher>);

impl Matchers {
    /// Parses every matcher string.
    ///
    /// # Errors
    ///
    /// Returns the first parse error.
    pub fn parse_all<S: AsRef<str>>(inputs: &[S]) -> Result<Self> {
        inputs
            .iter()
            .map(|s| Matcher::parse(s.as_ref()))
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// Builds matchers from their wire form.
    ///
    /// # Errors
    ///
    /// Returns the first compile error.
    pub fn from_specs(specs: &[MatcherSpec]) -> Result<Self> {
        specs
            .iter()
            .map(Matcher::from_spec)
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// True if every matcher matches. An empty set matches everything.
    #[must_use]
    pub fn matches(&self, labels: &Labels) -> bool {
        self.0.iter().all(|m| m.matches(labels))
    }

    /// Iterates over the matchers.
    pub fn iter(&self) -> std::slice::Iter<'_, Matcher> {
        self.0.iter()
    }

    /// Number of matchers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no matchers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Matcher>> for Matchers {
    fn from(matchers: Vec<Matcher>) -> Self {
        Self(matchers)
    }
}
