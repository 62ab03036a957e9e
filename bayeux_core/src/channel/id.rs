//! Hierarchical channel identifiers and wildcard matching.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Final segment of a single-level wildcard channel, matching exactly one
/// further segment.
const WILD: &str = "*";

/// Final segment of a deep wildcard channel, matching any number of further
/// segments.
const DEEP_WILD: &str = "**";

/// A `/`-segmented Bayeux channel path.
///
/// The path uniquely identifies a channel. Wildcard forms (`/a/b/*`,
/// `/a/**`) are themselves valid channels that sessions can subscribe to;
/// publishes are only ever addressed to concrete paths.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId {
    path: String,
}

/// Problem parsing a channel path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidChannel {
    /// The path was empty.
    #[error("channel path is empty")]
    Empty,

    /// The path did not start with `/`.
    #[error("channel path must start with '/': {0:?}")]
    NoLeadingSlash(String),

    /// The path contained an empty segment (`//` or a trailing `/`).
    #[error("channel path has an empty segment: {0:?}")]
    EmptySegment(String),

    /// A wildcard appeared somewhere other than the final segment.
    #[error("wildcard is only valid as the final segment: {0:?}")]
    WildcardNotLast(String),
}

impl ChannelId {
    /// Parse a channel path.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidChannel`] if the path is empty, lacks a leading
    /// slash, contains empty segments, or places a wildcard anywhere but the
    /// final segment.
    pub fn parse(path: &str) -> Result<Self, InvalidChannel> {
        if path.is_empty() {
            return Err(InvalidChannel::Empty);
        }
        let Some(rest) = path.strip_prefix('/') else {
            return Err(InvalidChannel::NoLeadingSlash(path.into()));
        };

        let segments: Vec<&str> = rest.split('/').collect();
        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(InvalidChannel::EmptySegment(path.into()));
            }
            let is_last = i == segments.len() - 1;
            if !is_last && (*segment == WILD || *segment == DEEP_WILD) {
                return Err(InvalidChannel::WildcardNotLast(path.into()));
            }
            if segment.contains('*') && *segment != WILD && *segment != DEEP_WILD {
                return Err(InvalidChannel::WildcardNotLast(path.into()));
            }
        }

        Ok(Self { path: path.into() })
    }

    /// The full path.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Iterate over the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path[1..].split('/')
    }

    /// Number of segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Whether this is a `/meta/...` channel.
    #[must_use]
    pub fn is_meta(&self) -> bool {
        self.first_segment() == "meta"
    }

    /// Whether this is a `/service/...` channel.
    #[must_use]
    pub fn is_service(&self) -> bool {
        self.first_segment() == "service"
    }

    /// Whether this channel ends in `*` (matches exactly one more segment).
    #[must_use]
    pub fn is_shallow_wild(&self) -> bool {
        self.last_segment() == WILD
    }

    /// Whether this channel ends in `**` (matches any further segments).
    #[must_use]
    pub fn is_deep_wild(&self) -> bool {
        self.last_segment() == DEEP_WILD
    }

    /// Whether this channel is any wildcard form.
    #[must_use]
    pub fn is_wild(&self) -> bool {
        self.is_shallow_wild() || self.is_deep_wild()
    }

    /// The parent channel, if any (`/a/b/c` → `/a/b`).
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let idx = self.path.rfind('/')?;
        if idx == 0 {
            return None;
        }
        Some(Self {
            path: self.path[..idx].into(),
        })
    }

    /// Whether this channel matches `other`.
    ///
    /// A concrete channel matches only itself. `/a/b/*` matches `/a/b/x` but
    /// neither `/a/b` nor `/a/b/x/y`. `/a/**` matches `/a/x`, `/a/x/y`, and
    /// so on, but not `/a` itself.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        if self.is_deep_wild() {
            let prefix = &self.path[..self.path.len() - DEEP_WILD.len()];
            return other.path.len() > prefix.len() && other.path.starts_with(prefix);
        }
        if self.is_shallow_wild() {
            let prefix = &self.path[..self.path.len() - WILD.len()];
            return other
                .path
                .strip_prefix(prefix)
                .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'));
        }
        self == other
    }

    /// Every wildcard channel form that could match this channel, most
    /// specific first.
    ///
    /// For `/a/b/c` this is `/a/b/*`, `/a/b/**`, `/a/**`, `/**`.
    #[must_use]
    pub fn wilds(&self) -> Vec<Self> {
        if self.is_wild() {
            return Vec::new();
        }

        let mut wilds = Vec::with_capacity(self.depth() + 1);
        let mut prefix = self.path.as_str();
        let mut shallow = true;
        while let Some(idx) = prefix.rfind('/') {
            prefix = &prefix[..idx];
            if shallow {
                wilds.push(Self {
                    path: format!("{prefix}/{WILD}"),
                });
                shallow = false;
            }
            wilds.push(Self {
                path: format!("{prefix}/{DEEP_WILD}"),
            });
        }
        wilds
    }

    fn first_segment(&self) -> &str {
        self.segments().next().unwrap_or("")
    }

    fn last_segment(&self) -> &str {
        self.segments().last().unwrap_or("")
    }
}

impl FromStr for ChannelId {
    type Err = InvalidChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChannelId {
    type Error = InvalidChannel;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChannelId> for String {
    fn from(value: ChannelId) -> Self {
        value.path
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}
