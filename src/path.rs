// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hierarchical entity paths.
//!
//! Every entity in the inventory is addressed by a canonical path made of
//! typed segments:
//!
//! ```text
//! /t;acme/f;host-1/r;jvm/m;heap
//!
//! t;acme ─────────────── tenant
//! └── f;host-1 ──────── feed
//!     └── r;jvm ─────── resource
//!         └── m;heap ── metric
//! ```
//!
//! A segment is `<type-code>;<id>`. Ids may contain `/`, `;` or `\` when
//! escaped with a backslash.
//!
//! The path decomposes into the key columns of a stored row: the tenant id,
//! the feed id (or the [`TENANT_PARTITION`] sentinel for entities that do not
//! live under a feed), the segment type of the last segment and the full
//! canonical string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Partition id used for entities that have no feed ancestor.
pub const TENANT_PARTITION: &str = "<TENANT>";

const PATH_DELIM: char = '/';
const TYPE_DELIM: char = ';';
const ESCAPE: char = '\\';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Path must start with '/': {0}")]
    MissingLeadingSlash(String),
    #[error("Path is empty")]
    Empty,
    #[error("Malformed segment '{segment}' in path '{path}'")]
    MalformedSegment { path: String, segment: String },
    #[error("Unknown segment type '{0}'")]
    UnknownType(String),
    #[error("Canonical path must start with a tenant segment, got '{0}'")]
    NotTenantRooted(String),
    #[error("A {parent} cannot contain a {child}")]
    IllegalChild { parent: SegmentType, child: SegmentType },
    #[error("Segment id must not be empty")]
    EmptyId,
}

/// The type of a path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SegmentType {
    Tenant,
    Environment,
    Feed,
    ResourceType,
    MetricType,
    OperationType,
    Resource,
    Metric,
    DataEntity,
}

impl SegmentType {
    pub const ALL: [SegmentType; 9] = [
        SegmentType::Tenant,
        SegmentType::Environment,
        SegmentType::Feed,
        SegmentType::ResourceType,
        SegmentType::MetricType,
        SegmentType::OperationType,
        SegmentType::Resource,
        SegmentType::Metric,
        SegmentType::DataEntity,
    ];

    /// Short code used in canonical paths and in the `entity_type` key column.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Tenant => "t",
            Self::Environment => "e",
            Self::Feed => "f",
            Self::ResourceType => "rt",
            Self::MetricType => "mt",
            Self::OperationType => "ot",
            Self::Resource => "r",
            Self::Metric => "m",
            Self::DataEntity => "d",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Whether an entity of this type can be the root of a sync request.
    #[must_use]
    pub fn is_syncable(self) -> bool {
        matches!(
            self,
            Self::Feed
                | Self::ResourceType
                | Self::MetricType
                | Self::OperationType
                | Self::Metric
                | Self::Resource
                | Self::DataEntity
        )
    }

    /// Containment rules of the inventory tree.
    #[must_use]
    pub fn can_contain(self, child: SegmentType) -> bool {
        use SegmentType::*;
        match self {
            Tenant => matches!(child, Environment | Feed | ResourceType | MetricType),
            Environment => matches!(child, Resource | Metric),
            Feed => matches!(child, ResourceType | MetricType | Resource | Metric),
            ResourceType => matches!(child, OperationType | DataEntity),
            OperationType => matches!(child, DataEntity),
            Resource => matches!(child, Resource | Metric | DataEntity),
            MetricType | Metric | DataEntity => false,
        }
    }
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tenant => "tenant",
            Self::Environment => "environment",
            Self::Feed => "feed",
            Self::ResourceType => "resourceType",
            Self::MetricType => "metricType",
            Self::OperationType => "operationType",
            Self::Resource => "resource",
            Self::Metric => "metric",
            Self::DataEntity => "dataEntity",
        };
        f.write_str(name)
    }
}

/// One `<type>;<id>` element of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    segment_type: SegmentType,
    id: String,
}

impl Segment {
    pub fn new(segment_type: SegmentType, id: impl Into<String>) -> Result<Self, PathError> {
        let id = id.into();
        if id.is_empty() {
            return Err(PathError::EmptyId);
        }
        Ok(Self { segment_type, id })
    }

    #[must_use]
    pub fn segment_type(&self) -> SegmentType {
        self.segment_type
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment_type.code())?;
        write!(f, "{}", TYPE_DELIM)?;
        for c in self.id.chars() {
            if matches!(c, PATH_DELIM | TYPE_DELIM | ESCAPE) {
                write!(f, "{}", ESCAPE)?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// Absolute, tenant-rooted path of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalPath {
    segments: Vec<Segment>,
}

impl CanonicalPath {
    /// Path of a tenant (the root of a tree).
    pub fn tenant(id: impl Into<String>) -> Result<Self, PathError> {
        Ok(Self {
            segments: vec![Segment::new(SegmentType::Tenant, id)?],
        })
    }

    /// Build a path from raw segments, validating the containment rules.
    pub fn from_segments(segments: Vec<Segment>) -> Result<Self, PathError> {
        let first = segments.first().ok_or(PathError::Empty)?;
        if first.segment_type != SegmentType::Tenant {
            return Err(PathError::NotTenantRooted(first.to_string()));
        }
        for pair in segments.windows(2) {
            let (parent, child) = (pair[0].segment_type, pair[1].segment_type);
            if !parent.can_contain(child) {
                return Err(PathError::IllegalChild { parent, child });
            }
        }
        Ok(Self { segments })
    }

    /// Parse `/t;tenant/f;feed/...`.
    pub fn parse(s: &str) -> Result<Self, PathError> {
        let rest = s
            .strip_prefix(PATH_DELIM)
            .ok_or_else(|| PathError::MissingLeadingSlash(s.to_string()))?;
        if rest.is_empty() {
            return Err(PathError::Empty);
        }

        let segments = split_unescaped(rest, PATH_DELIM)
            .into_iter()
            .map(|raw| parse_segment(s, &raw))
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_segments(segments)
    }

    /// Extend this path with a child segment.
    pub fn extend(&self, segment_type: SegmentType, id: impl Into<String>) -> Result<Self, PathError> {
        let parent = self.segment_type();
        if !parent.can_contain(segment_type) {
            return Err(PathError::IllegalChild { parent, child: segment_type });
        }
        let mut segments = self.segments.clone();
        segments.push(Segment::new(segment_type, id)?);
        Ok(Self { segments })
    }

    /// Append every segment of a relative path.
    pub fn join(&self, relative: &RelativePath) -> Result<Self, PathError> {
        relative
            .segments
            .iter()
            .try_fold(self.clone(), |acc, seg| acc.extend(seg.segment_type, seg.id.clone()))
    }

    /// The parent path, `None` for a tenant.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// All proper ancestors, nearest first.
    #[must_use]
    pub fn ancestors(&self) -> Vec<Self> {
        (1..self.segments.len())
            .rev()
            .map(|len| Self {
                segments: self.segments[..len].to_vec(),
            })
            .collect()
    }

    /// Path of `self` relative to `base`, if `base` is `self` or an ancestor of it.
    #[must_use]
    pub fn relative_to(&self, base: &CanonicalPath) -> Option<RelativePath> {
        if base.segments.len() > self.segments.len()
            || self.segments[..base.segments.len()] != base.segments[..]
        {
            return None;
        }
        Some(RelativePath {
            segments: self.segments[base.segments.len()..].to_vec(),
        })
    }

    #[must_use]
    pub fn is_ancestor_of(&self, other: &CanonicalPath) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Last segment of the path.
    #[must_use]
    pub fn segment(&self) -> &Segment {
        // Non-empty by construction.
        &self.segments[self.segments.len() - 1]
    }

    #[must_use]
    pub fn segment_type(&self) -> SegmentType {
        self.segment().segment_type
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of segments; a tenant has depth 1.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.segments[0].id
    }

    /// Id of the feed this entity lives under (or is), if any.
    #[must_use]
    pub fn feed_id(&self) -> Option<&str> {
        self.segments
            .iter()
            .find(|s| s.segment_type == SegmentType::Feed)
            .map(|s| s.id.as_str())
    }

    /// Storage partition id: the feed id or [`TENANT_PARTITION`].
    #[must_use]
    pub fn partition_id(&self) -> &str {
        self.feed_id().unwrap_or(TENANT_PARTITION)
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in &self.segments {
            write!(f, "{}{}", PATH_DELIM, seg)?;
        }
        Ok(())
    }
}

impl FromStr for CanonicalPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for CanonicalPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CanonicalPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Path relative to some root entity, used to address nodes of a sync structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RelativePath {
    segments: Vec<Segment>,
}

impl RelativePath {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Extend without containment checks; they apply once joined to a canonical root.
    pub fn extend(&self, segment_type: SegmentType, id: impl Into<String>) -> Result<Self, PathError> {
        let mut segments = self.segments.clone();
        segments.push(Segment::new(segment_type, id)?);
        Ok(Self { segments })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str(".");
        }
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", PATH_DELIM)?;
            }
            write!(f, "{}", seg)?;
        }
        Ok(())
    }
}

fn split_unescaped(s: &str, delim: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            // Keep escapes; the segment parser resolves them.
            current.push(c);
            if let Some(next) = chars.next() {
                current.push(next);
            }
        } else if c == delim {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

fn parse_segment(path: &str, raw: &str) -> Result<Segment, PathError> {
    let malformed = || PathError::MalformedSegment {
        path: path.to_string(),
        segment: raw.to_string(),
    };

    let (code, escaped_id) = raw.split_once(TYPE_DELIM).ok_or_else(malformed)?;
    let segment_type =
        SegmentType::from_code(code).ok_or_else(|| PathError::UnknownType(code.to_string()))?;

    let mut id = String::with_capacity(escaped_id.len());
    let mut chars = escaped_id.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => id.push(chars.next().ok_or_else(malformed)?),
            TYPE_DELIM => return Err(malformed()),
            _ => id.push(c),
        }
    }

    Segment::new(segment_type, id)
}
