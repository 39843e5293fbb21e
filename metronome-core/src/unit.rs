// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Base units attached to meters.
//!
//! Backends want a canonical unit name: lower case, singular, full word
//! (`"microsecond"`, never `"us"` or `"MICROSECONDS"`). [`BaseUnit::parse`]
//! accepts what callers tend to write and [`BaseUnit::name`] produces the
//! canonical form.

use std::{borrow::Cow, fmt};

/// The unit a meter's values are expressed in.
#[non_exhaustive]
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub enum BaseUnit {
    /// No unit
    #[default]
    None,
    /// Percent
    Percent,
    /// Time with a scale
    Time(TimeScale),
    /// Bytes with a scale prefix
    Byte(PositiveScale),
    /// Bits with a scale prefix
    Bit(PositiveScale),
    /// Any other unit, stored lowercased
    Custom(Cow<'static, str>),
}

/// Time scales, from nanoseconds to days.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeScale {
    /// `10^-9` seconds
    Nanosecond,
    /// `10^-6` seconds
    Microsecond,
    /// `10^-3` seconds
    #[default]
    Millisecond,
    /// One second
    Second,
    /// 60 seconds
    Minute,
    /// 3600 seconds
    Hour,
    /// 86400 seconds
    Day,
}

/// Supported *positive* power-of-ten scales for byte and bit units.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PositiveScale {
    /// `10^0`
    #[default]
    One,
    /// `10^3`
    Kilo,
    /// `10^6`
    Mega,
    /// `10^9`
    Giga,
    /// `10^12`
    Tera,
}

impl TimeScale {
    /// Nanoseconds in one unit of this scale.
    pub const fn nanos(self) -> u64 {
        match self {
            Self::Nanosecond => 1,
            Self::Microsecond => 1_000,
            Self::Millisecond => 1_000_000,
            Self::Second => 1_000_000_000,
            Self::Minute => 60_000_000_000,
            Self::Hour => 3_600_000_000_000,
            Self::Day => 86_400_000_000_000,
        }
    }

    /// Convert a nanosecond amount into this scale.
    ///
    /// ```
    /// # use metronome_core::TimeScale;
    /// assert_eq!(TimeScale::Millisecond.from_nanos(2_500_000.0), 2.5);
    /// ```
    pub fn from_nanos(self, nanos: f64) -> f64 {
        nanos / self.nanos() as f64
    }

    /// Canonical name of this scale.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nanosecond => "nanosecond",
            Self::Microsecond => "microsecond",
            Self::Millisecond => "millisecond",
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

impl BaseUnit {
    /// Milliseconds, the default base time unit of a registry.
    pub const MILLISECONDS: BaseUnit = BaseUnit::Time(TimeScale::Millisecond);

    /// Canonical backend name: lower case, singular, full word.
    pub fn name(&self) -> Cow<'static, str> {
        macro_rules! positive_scale {
            ($scale:expr, $base:literal) => {
                match $scale {
                    PositiveScale::One => $base,
                    PositiveScale::Kilo => concat!("kilo", $base),
                    PositiveScale::Mega => concat!("mega", $base),
                    PositiveScale::Giga => concat!("giga", $base),
                    PositiveScale::Tera => concat!("tera", $base),
                }
            };
        }

        Cow::Borrowed(match self {
            Self::None => "",
            Self::Percent => "percent",
            Self::Time(scale) => scale.name(),
            Self::Byte(scale) => positive_scale!(scale, "byte"),
            Self::Bit(scale) => positive_scale!(scale, "bit"),
            Self::Custom(unit) => return unit.clone(),
        })
    }

    /// Whether this is [`BaseUnit::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Parse a unit the way callers write them.
    ///
    /// Matching ignores case, trailing plural `s`, and accepts the usual
    /// abbreviations. Anything unrecognized becomes a lowercased
    /// [`BaseUnit::Custom`].
    ///
    /// ```
    /// # use metronome_core::{BaseUnit, TimeScale};
    /// assert_eq!(BaseUnit::parse("MICROSECONDS"), BaseUnit::Time(TimeScale::Microsecond));
    /// assert_eq!(BaseUnit::parse("ms").name(), "millisecond");
    /// assert_eq!(BaseUnit::parse("Requests").name(), "requests");
    /// ```
    pub fn parse(unit: &str) -> BaseUnit {
        let lower = unit.trim().to_lowercase();
        match lower.as_str() {
            "" | "none" => return BaseUnit::None,
            "%" | "percent" | "percents" | "pct" => return BaseUnit::Percent,
            "ns" | "nanos" => return BaseUnit::Time(TimeScale::Nanosecond),
            "us" | "µs" | "μs" | "micros" => return BaseUnit::Time(TimeScale::Microsecond),
            "ms" | "millis" => return BaseUnit::Time(TimeScale::Millisecond),
            "s" | "sec" | "secs" => return BaseUnit::Time(TimeScale::Second),
            "m" | "min" | "mins" => return BaseUnit::Time(TimeScale::Minute),
            "h" | "hr" | "hrs" => return BaseUnit::Time(TimeScale::Hour),
            "d" => return BaseUnit::Time(TimeScale::Day),
            "b" => return BaseUnit::Byte(PositiveScale::One),
            "kb" => return BaseUnit::Byte(PositiveScale::Kilo),
            "mb" => return BaseUnit::Byte(PositiveScale::Mega),
            "gb" => return BaseUnit::Byte(PositiveScale::Giga),
            "tb" => return BaseUnit::Byte(PositiveScale::Tera),
            _ => {}
        }

        let singular = lower.strip_suffix('s').unwrap_or(&lower);
        let (scale, rest) = split_scale_prefix(singular);
        match (scale, rest) {
            (None, "nanosecond") => BaseUnit::Time(TimeScale::Nanosecond),
            (None, "microsecond") => BaseUnit::Time(TimeScale::Microsecond),
            (None, "millisecond") => BaseUnit::Time(TimeScale::Millisecond),
            (None, "second") => BaseUnit::Time(TimeScale::Second),
            (None, "minute") => BaseUnit::Time(TimeScale::Minute),
            (None, "hour") => BaseUnit::Time(TimeScale::Hour),
            (None, "day") => BaseUnit::Time(TimeScale::Day),
            (scale, "byte") => BaseUnit::Byte(scale.unwrap_or_default()),
            (scale, "bit") => BaseUnit::Bit(scale.unwrap_or_default()),
            _ => BaseUnit::Custom(Cow::Owned(lower)),
        }
    }
}

fn split_scale_prefix(unit: &str) -> (Option<PositiveScale>, &str) {
    const PREFIXES: [(&str, PositiveScale); 4] = [
        ("kilo", PositiveScale::Kilo),
        ("mega", PositiveScale::Mega),
        ("giga", PositiveScale::Giga),
        ("tera", PositiveScale::Tera),
    ];
    for (prefix, scale) in PREFIXES {
        if let Some(rest) = unit.strip_prefix(prefix) {
            return (Some(scale), rest);
        }
    }
    (None, unit)
}

impl From<TimeScale> for BaseUnit {
    fn from(scale: TimeScale) -> Self {
        BaseUnit::Time(scale)
    }
}

impl From<&str> for BaseUnit {
    fn from(unit: &str) -> Self {
        BaseUnit::parse(unit)
    }
}

impl fmt::Display for BaseUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
