//! Retention periods: a quantity of calendar-naive units.
//!
//! Months are 30 days and years are 365 days. These are fixed factors, not
//! calendar arithmetic.

use chrono::{DateTime, TimeDelta, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

const DAY_IN_SECONDS: u64 = 24 * 3600;

/// Unit of a [`RetentionPeriod`].
///
/// Parsing is permissive: anything that is not a known unit key, including
/// non-string values, is treated as days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(into = "String")]
pub enum PeriodUnit {
    #[default]
    Days,
    Months,
    Years,
}

impl PeriodUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodUnit::Days => "days",
            PeriodUnit::Months => "months",
            PeriodUnit::Years => "years",
        }
    }

    /// Length of one unit in days.
    pub fn factor_days(&self) -> u64 {
        match self {
            PeriodUnit::Days => 1,
            PeriodUnit::Months => 30,
            PeriodUnit::Years => 365,
        }
    }
}

impl From<&str> for PeriodUnit {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "months" => PeriodUnit::Months,
            "years" => PeriodUnit::Years,
            _ => PeriodUnit::Days,
        }
    }
}

impl From<String> for PeriodUnit {
    fn from(value: String) -> Self {
        PeriodUnit::from(value.as_str())
    }
}

impl<'de> Deserialize<'de> for PeriodUnit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawUnit {
            Key(String),
            Other(IgnoredAny),
        }

        Ok(match RawUnit::deserialize(deserializer)? {
            RawUnit::Key(key) => PeriodUnit::from(key),
            RawUnit::Other(_) => PeriodUnit::Days,
        })
    }
}

impl From<PeriodUnit> for String {
    fn from(unit: PeriodUnit) -> Self {
        unit.as_str().to_string()
    }
}

impl fmt::Display for PeriodUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retention duration such as "30 days" or "2 years".
///
/// A zero quantity means the policy is switched off. A value that is not an
/// object (`null`, a bare number, a string) reads as switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct RetentionPeriod {
    pub quantity: u32,
    pub unit: PeriodUnit,
}

impl RetentionPeriod {
    pub const DISABLED: RetentionPeriod = RetentionPeriod {
        quantity: 0,
        unit: PeriodUnit::Days,
    };

    pub const fn new(quantity: u32, unit: PeriodUnit) -> Self {
        Self { quantity, unit }
    }

    pub const fn days(quantity: u32) -> Self {
        Self::new(quantity, PeriodUnit::Days)
    }

    pub const fn months(quantity: u32) -> Self {
        Self::new(quantity, PeriodUnit::Months)
    }

    pub const fn years(quantity: u32) -> Self {
        Self::new(quantity, PeriodUnit::Years)
    }

    /// Whether this policy is switched on.
    pub fn has_effect(&self) -> bool {
        self.quantity > 0
    }

    /// Length in seconds, zero when the policy has no effect.
    pub fn to_seconds(&self) -> u64 {
        if !self.has_effect() {
            return 0;
        }
        u64::from(self.quantity) * self.unit.factor_days() * DAY_IN_SECONDS
    }

    /// Instant before which records are past this period, relative to `now`.
    ///
    /// Returns `None` when the policy has no effect, and when the period
    /// reaches back past the representable time range (nothing can be that
    /// old).
    pub fn threshold(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.has_effect() {
            return None;
        }
        let seconds = i64::try_from(self.to_seconds()).ok()?;
        let delta = TimeDelta::try_seconds(seconds)?;
        now.checked_sub_signed(delta)
    }
}

impl fmt::Display for RetentionPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_effect() {
            write!(f, "{} {}", self.quantity, self.unit)
        } else {
            f.write_str("disabled")
        }
    }
}

impl<'de> Deserialize<'de> for RetentionPeriod {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Fields {
            #[serde(default, deserialize_with = "lenient_quantity")]
            quantity: u32,
            #[serde(default)]
            unit: PeriodUnit,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawPeriod {
            Fields(Fields),
            Other(IgnoredAny),
        }

        Ok(match RawPeriod::deserialize(deserializer)? {
            RawPeriod::Fields(Fields { quantity, unit }) => RetentionPeriod { quantity, unit },
            RawPeriod::Other(_) => RetentionPeriod::DISABLED,
        })
    }
}

/// Accepts integers, numeric strings and blanks; negatives and garbage become 0.
fn lenient_quantity<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawQuantity {
        Int(i64),
        Float(f64),
        Text(String),
        Other(IgnoredAny),
    }

    let quantity = match RawQuantity::deserialize(deserializer)? {
        RawQuantity::Int(value) => value.clamp(0, i64::from(u32::MAX)) as u32,
        RawQuantity::Float(value) if value.is_finite() && value > 0.0 => {
            value.min(f64::from(u32::MAX)) as u32
        }
        RawQuantity::Float(_) => 0,
        RawQuantity::Text(text) => text
            .trim()
            .parse::<i64>()
            .map(|value| value.clamp(0, i64::from(u32::MAX)) as u32)
            .unwrap_or(0),
        RawQuantity::Other(_) => 0,
    };

    Ok(quantity)
}
