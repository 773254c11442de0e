//! Entitlement and feature types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{EntitlementLimits, ParseError, UsagePeriod};

/// Feature gated by plan entitlements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Metered analyses per month
    Analyses,
    /// Metered storage in gigabytes
    Storage,
    /// AI chat (boolean entitlement)
    Chat,
}

impl Feature {
    /// Get the feature ID string
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Analyses => "analyses",
            Self::Storage => "storage",
            Self::Chat => "chat",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Feature {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analyses" => Ok(Self::Analyses),
            "storage" => Ok(Self::Storage),
            "chat" => Ok(Self::Chat),
            _ => Err(ParseError::new("feature", s)),
        }
    }
}

/// Entitlement check result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitlementCheck {
    pub feature: Feature,
    /// Whether the feature is usable now
    pub allowed: bool,
    /// Remaining allowance, absent when unlimited or not metered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<Decimal>,
    /// Cap for the period, absent when unlimited or not metered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<Decimal>,
    /// Human-readable explanation
    pub message: String,
}

/// Remaining allowance per metered feature, clamped at zero
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemainingUsage {
    pub analyses_remaining: Option<i64>,
    pub storage_remaining_gb: Option<Decimal>,
}

/// Current period usage together with the limits it is measured against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub usage: UsagePeriod,
    pub limits: EntitlementLimits,
    pub remaining_usage: RemainingUsage,
}
