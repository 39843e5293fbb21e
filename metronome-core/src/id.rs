// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    borrow::Cow,
    fmt,
    hash::{Hash, Hasher},
};

use smallvec::SmallVec;

use crate::{BaseUnit, RecordingError};

/// A single `key=value` dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    key: Cow<'static, str>,
    value: Cow<'static, str>,
}

impl Tag {
    /// Create a tag
    pub fn new(key: impl Into<Cow<'static, str>>, value: impl Into<Cow<'static, str>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Tag key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Tag value
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// An unordered set of tags with unique keys.
///
/// Stored sorted by key, so two sets built in a different order compare and
/// hash equal. Adding a key that is already present replaces its value.
///
/// ```
/// # use metronome_core::Tags;
/// let a = Tags::of([("region", "eu"), ("az", "1a")]);
/// let b = Tags::of([("az", "1a"), ("region", "eu")]);
/// assert_eq!(a, b);
/// assert_eq!(a.and("az", "1b").get("az"), Some("1b"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Tags(SmallVec<[Tag; 4]>);

impl Tags {
    /// No tags
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a tag set from `(key, value)` pairs. Later duplicates win.
    pub fn of<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Cow<'static, str>>,
        V: Into<Cow<'static, str>>,
    {
        let mut tags = Self::empty();
        for (k, v) in pairs {
            tags.insert(Tag::new(k, v));
        }
        tags
    }

    /// Add or replace one tag
    pub fn and(
        mut self,
        key: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.insert(Tag::new(key, value));
        self
    }

    /// Merge `other` into these tags; `other` wins on key conflicts.
    pub fn merge(mut self, other: &Tags) -> Self {
        for tag in other.iter() {
            self.insert(tag.clone());
        }
        self
    }

    fn insert(&mut self, tag: Tag) {
        match self.0.binary_search_by(|t| t.key.cmp(&tag.key)) {
            Ok(i) => self.0[i] = tag,
            Err(i) => self.0.insert(i, tag),
        }
    }

    /// Value for `key`, if present
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .binary_search_by(|t| t.key().cmp(key))
            .ok()
            .map(|i| self.0[i].value())
    }

    /// Iterate tags in key order
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no tags
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), RecordingError> {
        match self.iter().find(|t| t.key().is_empty()) {
            Some(_) => Err(RecordingError::InvalidTag {
                name: name.to_owned(),
                reason: "tag keys must not be empty",
            }),
            None => Ok(()),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Tags
where
    K: Into<Cow<'static, str>>,
    V: Into<Cow<'static, str>>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Tags::of(iter)
    }
}

/// Kind of a meter. A name is bound to one kind for the life of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeterKind {
    /// Monotonic per-step sum
    Counter,
    /// Durations: count, total time, max
    Timer,
    /// Amounts: count, total, max
    DistributionSummary,
    /// Sampled instantaneous value
    Gauge,
}

impl fmt::Display for MeterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Counter => "counter",
            Self::Timer => "timer",
            Self::DistributionSummary => "distribution summary",
            Self::Gauge => "gauge",
        })
    }
}

/// Identity and descriptive metadata of a meter.
///
/// Equality and hashing only consider the name and tags: the unit, kind and
/// description describe a meter but do not distinguish it.
#[derive(Debug, Clone)]
pub struct MeterId {
    name: Cow<'static, str>,
    tags: Tags,
    kind: MeterKind,
    base_unit: BaseUnit,
    description: Option<Cow<'static, str>>,
}

impl MeterId {
    /// Create an identity for a meter
    pub fn new(name: impl Into<Cow<'static, str>>, tags: Tags, kind: MeterKind) -> Self {
        Self {
            name: name.into(),
            tags,
            kind,
            base_unit: BaseUnit::None,
            description: None,
        }
    }

    /// Set the base unit
    pub fn with_base_unit(mut self, unit: BaseUnit) -> Self {
        self.base_unit = unit;
        self
    }

    pub(crate) fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: Option<Cow<'static, str>>) -> Self {
        self.description = description;
        self
    }

    /// Meter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Meter tags
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Meter kind
    pub fn kind(&self) -> MeterKind {
        self.kind
    }

    /// Base unit of the values this meter reports
    pub fn base_unit(&self) -> &BaseUnit {
        &self.base_unit
    }

    /// Human-readable description
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub(crate) fn key(&self) -> MeterKey {
        MeterKey {
            name: self.name.clone(),
            tags: self.tags.clone(),
        }
    }
}

impl PartialEq for MeterId {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.tags == other.tags
    }
}

impl Eq for MeterId {}

impl Hash for MeterId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.tags.hash(state);
    }
}

impl fmt::Display for MeterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.tags.is_empty() {
            f.write_str("{")?;
            for (i, tag) in self.tags.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}={}", tag.key(), tag.value())?;
            }
            f.write_str("}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct MeterKey {
    name: Cow<'static, str>,
    tags: Tags,
}
