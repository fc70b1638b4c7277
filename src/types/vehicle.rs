//! Vehicle class types

use serde::{Deserialize, Serialize};

use super::Channel;

/// Which orders a vehicle class may carry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "tag")]
pub enum ChannelRule {
    /// Orders of any channel
    #[default]
    Any,
    /// Every order in the set must carry this channel
    AllShare(Channel),
}

/// Reduced drop ceiling applied when any order in the set carries `channel`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropOverride {
    pub channel: Channel,
    pub max_drops: u32,
}

/// Trigger that lets a larger class claim a load a smaller class could also carry
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "fraction")]
pub enum MinLoadStrategy {
    /// Only assigned when no smaller class fits
    #[default]
    None,
    /// Total weight strictly above the next-smaller class's weight ceiling.
    ///
    /// Such a load already fits no smaller class, so this picks the same class
    /// as `None`; it only guards against lighter loads claiming this class.
    ExceedsSmallerCeiling,
    /// Some single order weighs at least `fraction` of this class's ceiling
    SingleOrderFraction(f64),
    /// Total weight is at least `fraction` of this class's ceiling
    TotalLoadFraction(f64),
}

impl MinLoadStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            MinLoadStrategy::None => "none",
            MinLoadStrategy::ExceedsSmallerCeiling => "exceeds-smaller-ceiling",
            MinLoadStrategy::SingleOrderFraction(_) => "single-order-fraction",
            MinLoadStrategy::TotalLoadFraction(_) => "total-load-fraction",
        }
    }
}

impl std::str::FromStr for MinLoadStrategy {
    type Err = String;

    /// Parses `none`, `exceeds-smaller-ceiling`, `single-order-fraction:0.8`
    /// or `total-load-fraction:0.8`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg.trim())),
            None => (s.trim(), None),
        };

        let fraction = || -> Result<f64, String> {
            let raw = arg.ok_or_else(|| format!("strategy '{}' needs a fraction, e.g. {}:0.8", name, name))?;
            raw.parse::<f64>()
                .map_err(|_| format!("invalid fraction '{}'", raw))
        };

        match name {
            "none" => Ok(MinLoadStrategy::None),
            "exceeds-smaller-ceiling" => Ok(MinLoadStrategy::ExceedsSmallerCeiling),
            "single-order-fraction" => Ok(MinLoadStrategy::SingleOrderFraction(fraction()?)),
            "total-load-fraction" => Ok(MinLoadStrategy::TotalLoadFraction(fraction()?)),
            other => Err(format!("unknown min-load strategy '{}'", other)),
        }
    }
}

/// A vehicle class with its capacity and eligibility rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleClass {
    pub label: String,
    pub max_weight_kg: f64,
    pub max_drops: u32,
    #[serde(default)]
    pub max_cases: Option<u32>,
    #[serde(default)]
    pub drop_override: Option<DropOverride>,
    #[serde(default)]
    pub min_load: MinLoadStrategy,
    #[serde(default)]
    pub channel_rule: ChannelRule,
}

impl VehicleClass {
    pub fn new(label: impl Into<String>, max_weight_kg: f64, max_drops: u32) -> Self {
        Self {
            label: label.into(),
            max_weight_kg,
            max_drops,
            max_cases: None,
            drop_override: None,
            min_load: MinLoadStrategy::None,
            channel_rule: ChannelRule::Any,
        }
    }

    pub fn with_drop_override(mut self, channel: Channel, max_drops: u32) -> Self {
        self.drop_override = Some(DropOverride { channel, max_drops });
        self
    }

    pub fn with_min_load(mut self, min_load: MinLoadStrategy) -> Self {
        self.min_load = min_load;
        self
    }

    pub fn with_channel_rule(mut self, channel_rule: ChannelRule) -> Self {
        self.channel_rule = channel_rule;
        self
    }
}
