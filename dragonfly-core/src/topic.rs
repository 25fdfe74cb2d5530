use std::fmt::Display;
use std::hash::{Hash, Hasher};

use regex::{Regex, RegexBuilder};

use crate::err::{DecodeError, DecodeErrorKind};

/// Longest accepted pattern source. Clients supply patterns verbatim, so
/// compilation has to be bounded before the broker will hold on to one.
pub const MAX_PATTERN_LEN: usize = 512;

const COMPILED_SIZE_LIMIT: usize = 1 << 20;

/// A subscription topic pattern: a regular expression matched against the
/// start of a publication's topic. `a` matches `abc`; `b` does not.
/// Literal topics subscribe by their escaped form.
#[derive(Debug, Clone)]
pub struct TopicPattern {
    source: String,
    regex: Regex,
}

impl TopicPattern {
    pub fn compile(source: &str) -> Result<Self, DecodeError> {
        if source.len() > MAX_PATTERN_LEN {
            return Err(DecodeError::new(
                DecodeErrorKind::BadPattern,
                format!(
                    "Pattern of {} bytes exceeds the {MAX_PATTERN_LEN} byte limit.",
                    source.len()
                ),
            ));
        }

        // anchor at the start of the topic without touching the pattern's
        // own alternations
        let anchored = format!("^(?:{source})");

        let regex = RegexBuilder::new(&anchored)
            .size_limit(COMPILED_SIZE_LIMIT)
            .build()
            .map_err(|e| DecodeError::new(DecodeErrorKind::BadPattern, e.to_string()))?;

        return Ok(Self {
            source: source.to_owned(),
            regex,
        });
    }

    pub fn matches(&self, topic: &str) -> bool {
        return self.regex.is_match(topic);
    }

    pub fn source(&self) -> &str {
        return &self.source;
    }
}

impl PartialEq for TopicPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for TopicPattern {}

impl Hash for TopicPattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl Display for TopicPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "{}", self.source);
    }
}
