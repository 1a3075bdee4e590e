//! Dotted addresses into the job document.
//!
//! A field path such as `runs[].mail_settings.subject` is a list of segments. A segment
//! is a plain attribute (`subject`), an attribute carrying the repeat marker
//! (`runs[]`, broadcast over every element) or an explicitly indexed attribute
//! (`runs[1]`). A path may carry at most one repeat marker.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::{ConfigError, ConfigResult};

/// Marks the one segment of a path that is broadcast over a sequence.
pub const REPEAT_MARKER: &str = "[]";

static SEGMENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-zA-Z_][a-zA-Z0-9_]*)(?:\[(\d*)\])?$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Attr(String),
    Repeat(String),
    Index(String, usize),
}

impl Segment {
    /// The attribute name this segment addresses.
    pub fn name(&self) -> &str {
        match self {
            Segment::Attr(name) | Segment::Repeat(name) | Segment::Index(name, _) => name,
        }
    }

    fn parse(path: &str, text: &str) -> ConfigResult<Self> {
        let invalid = |message: String| ConfigError::InvalidFieldPath {
            path: path.to_string(),
            message,
        };

        if text.is_empty() {
            return Err(invalid("empty segment".to_string()));
        }
        let caps = SEGMENT_REGEX
            .captures(text)
            .ok_or_else(|| invalid(format!("malformed segment '{}'", text)))?;
        let name = caps[1].to_string();

        match caps.get(2).map(|m| m.as_str()) {
            None => Ok(Segment::Attr(name)),
            Some("") => Ok(Segment::Repeat(name)),
            Some(digits) => digits
                .parse()
                .map(|idx| Segment::Index(name, idx))
                .map_err(|_| invalid(format!("index out of range in segment '{}'", text))),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Attr(name) => write!(f, "{}", name),
            Segment::Repeat(name) => write!(f, "{}{}", name, REPEAT_MARKER),
            Segment::Index(name, idx) => write!(f, "{}[{}]", name, idx),
        }
    }
}

/// A validated field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        let segments = raw
            .split('.')
            .map(|text| Segment::parse(raw, text))
            .collect::<ConfigResult<Vec<_>>>()?;

        let markers = segments
            .iter()
            .filter(|s| matches!(s, Segment::Repeat(_)))
            .count();
        if markers > 1 {
            return Err(ConfigError::InvalidFieldPath {
                path: raw.to_string(),
                message: format!(
                    "only one segment may carry the list marker '{}'",
                    REPEAT_MARKER
                ),
            });
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn has_repeat_marker(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Repeat(_)))
    }

    /// Specialize the path, replacing the repeat marker with `index` when given.
    pub fn instance(&self, index: Option<usize>) -> ConfigResult<FieldPathInstance> {
        let Some(index) = index else {
            return Ok(FieldPathInstance {
                based_on: self.clone(),
                index: None,
                segments: self.segments.clone(),
            });
        };

        if !self.has_repeat_marker() {
            return Err(ConfigError::InvalidFieldPath {
                path: self.raw.clone(),
                message: format!(
                    "an index may only be given for paths with the list marker '{}'",
                    REPEAT_MARKER
                ),
            });
        }

        let segments = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Repeat(name) => Segment::Index(name.clone(), index),
                other => other.clone(),
            })
            .collect();

        Ok(FieldPathInstance {
            based_on: self.clone(),
            index: Some(index),
            segments,
        })
    }
}

impl FromStr for FieldPath {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldPath::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A field path with its repeat marker optionally pinned to one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPathInstance {
    based_on: FieldPath,
    index: Option<usize>,
    segments: Vec<Segment>,
}

impl FieldPathInstance {
    pub fn based_on(&self) -> &FieldPath {
        &self.based_on
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl fmt::Display for FieldPathInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}
