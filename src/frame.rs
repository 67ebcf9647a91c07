//! Stack-dump frame parsing and include/exclude filtering
//!
//! A thread dump arrives as text; each frame line has the shape
//! `\tat namespace.Type.method(Source.java:123)`. A line qualifies as a
//! frame only if it carries the prefix, meets the minimum length, and its
//! qualified name splits into at least namespace, type and method.

use regex::Regex;
use tracing::{debug, warn};

/// Prefix that marks a stack frame line in a thread dump
pub const FRAME_PREFIX: &str = "\tat ";

/// Lines shorter than this cannot hold a qualified name
pub const MIN_FRAME_LEN: usize = 10;

/// Canonical identity of one executing method; equality by value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodIdentity {
    /// Package / namespace portion of the qualified name
    pub namespace: String,
    /// Type (class) name
    pub type_name: String,
    /// Method name
    pub method: String,
}

impl MethodIdentity {
    pub fn new(namespace: &str, type_name: &str, method: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            type_name: type_name.to_string(),
            method: method.to_string(),
        }
    }

    /// Dotted form, `namespace.Type.method`
    pub fn qualified(&self) -> String {
        format!("{}.{}.{}", self.namespace, self.type_name, self.method)
    }
}

/// Compiled include/exclude filters applied to the qualified name
///
/// A frame is kept iff (whitelist empty OR whitelist matches) AND
/// (blacklist empty OR blacklist does not match).
#[derive(Debug, Clone, Default)]
pub struct FrameFilter {
    white: Option<Regex>,
    black: Option<Regex>,
}

impl FrameFilter {
    pub fn new(white: Option<Regex>, black: Option<Regex>) -> Self {
        Self { white, black }
    }

    /// Check whether a qualified name passes both filters
    pub fn keeps(&self, qualified_name: &str) -> bool {
        if let Some(white) = &self.white {
            if !white.is_match(qualified_name) {
                return false;
            }
        }
        if let Some(black) = &self.black {
            if black.is_match(qualified_name) {
                return false;
            }
        }
        true
    }
}

/// Parse one dump line into a filtered method identity
///
/// Returns `None` for non-frame lines, frames dropped by the filter, and
/// malformed qualified names (logged and skipped).
pub fn parse_line(line: &str, filter: &FrameFilter) -> Option<MethodIdentity> {
    if !line.starts_with(FRAME_PREFIX) || line.len() <= MIN_FRAME_LEN {
        return None;
    }

    // Trim the frame prefix and the trailing argument list
    let rest = &line[FRAME_PREFIX.len()..];
    let qualified = match rest.rfind('(') {
        Some(paren) => rest[..paren].trim(),
        None => return None,
    };

    if !filter.keeps(qualified) {
        debug!("filtered out frame '{}'", qualified);
        return None;
    }

    let split: Vec<&str> = qualified.split('.').collect();
    if split.len() < 3 {
        warn!("can't process line '{}'", line.trim_end());
        return None;
    }

    let method = split[split.len() - 1];
    let type_name = split[split.len() - 2];
    let namespace = split[..split.len() - 2].join(".");
    debug!(
        "line='{}' namespace='{}' type='{}' method='{}'",
        line.trim_end(),
        namespace,
        type_name,
        method
    );
    Some(MethodIdentity::new(&namespace, type_name, method))
}
