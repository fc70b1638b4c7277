//! Vehicle class rules and the load classifier
//!
//! A candidate set of orders is summarized into a [`LoadProfile`] and tested
//! against every class, largest weight ceiling first. A class *fits* when its
//! weight ceiling, drop ceiling (possibly reduced by a channel override), case
//! ceiling and channel predicate all hold. Among fitting classes a larger one
//! only claims the load when its minimum-effective-load strategy triggers;
//! otherwise the smallest fitting class is assigned.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::types::{Channel, ChannelRule, MinLoadStrategy, Order, VehicleClass};

/// Rule table errors
#[derive(Debug, Error)]
pub enum RulesError {
    #[error("vehicle rule table is empty")]
    Empty,
    #[error("duplicate vehicle class label '{0}'")]
    DuplicateLabel(String),
    #[error("vehicle class '{label}' needs a positive weight ceiling and drop count")]
    InvalidCeiling { label: String },
    #[error("vehicle class '{label}' has min-load fraction {fraction} outside (0, 1]")]
    InvalidFraction { label: String, fraction: f64 },
    #[error("failed to read vehicle rules from {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse vehicle rules from {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Rules file layout: `{ "classes": [ ... ] }`
#[derive(Debug, Deserialize)]
struct RulesFile {
    classes: Vec<VehicleClass>,
}

/// Round a weight to 0.01 kg before comparing against ceilings
fn round_kg(weight_kg: f64) -> f64 {
    (weight_kg * 100.0).round() / 100.0
}

/// Aggregate view of a candidate order set, cheap to extend one order at a time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadProfile {
    drops: u32,
    weight_kg: f64,
    cases: u32,
    heaviest_order_kg: f64,
    channels: BTreeSet<Channel>,
}

impl LoadProfile {
    pub fn from_orders<'a>(orders: impl IntoIterator<Item = &'a Order>) -> Self {
        let mut profile = Self::default();
        for order in orders {
            profile.push(order);
        }
        profile
    }

    pub fn push(&mut self, order: &Order) {
        self.drops = self.drops.saturating_add(1);
        self.weight_kg += order.weight_kg;
        self.cases = self.cases.saturating_add(order.cases);
        self.heaviest_order_kg = self.heaviest_order_kg.max(order.weight_kg);
        self.channels.insert(order.channel.clone());
    }

    /// Profile of this set plus `order`
    pub fn with(&self, order: &Order) -> Self {
        let mut next = self.clone();
        next.push(order);
        next
    }

    pub fn is_empty(&self) -> bool {
        self.drops == 0
    }

    pub fn drops(&self) -> u32 {
        self.drops
    }

    pub fn weight_kg(&self) -> f64 {
        self.weight_kg
    }

    fn carries(&self, channel: &Channel) -> bool {
        self.channels.contains(channel)
    }

    fn all_share(&self, channel: &Channel) -> bool {
        !self.channels.is_empty() && self.channels.iter().all(|c| c == channel)
    }
}

/// Ordered vehicle class table
#[derive(Debug, Clone)]
pub struct VehicleRules {
    /// Sorted by weight ceiling, largest first; ties by label
    classes: Vec<VehicleClass>,
}

impl VehicleRules {
    /// Validate and order a class table
    pub fn new(classes: Vec<VehicleClass>) -> Result<Self, RulesError> {
        if classes.is_empty() {
            return Err(RulesError::Empty);
        }

        let mut labels = HashSet::new();
        for class in &classes {
            if !labels.insert(class.label.as_str()) {
                return Err(RulesError::DuplicateLabel(class.label.clone()));
            }
            let override_ok = class.drop_override.as_ref().map_or(true, |o| o.max_drops > 0);
            if !(class.max_weight_kg > 0.0) || class.max_drops == 0 || !override_ok {
                return Err(RulesError::InvalidCeiling { label: class.label.clone() });
            }
            match class.min_load {
                MinLoadStrategy::SingleOrderFraction(fraction)
                | MinLoadStrategy::TotalLoadFraction(fraction)
                    if !(fraction > 0.0 && fraction <= 1.0) =>
                {
                    return Err(RulesError::InvalidFraction {
                        label: class.label.clone(),
                        fraction,
                    });
                }
                _ => {}
            }
        }

        Ok(Self::sorted(classes))
    }

    fn sorted(mut classes: Vec<VehicleClass>) -> Self {
        classes.sort_by(|a, b| {
            b.max_weight_kg
                .total_cmp(&a.max_weight_kg)
                .then_with(|| a.label.cmp(&b.label))
        });
        Self { classes }
    }

    /// Built-in table: pickup (4W), six-wheeler (6W) and ten-wheeler (10W).
    ///
    /// The ten-wheeler only serves large-format retail drops; both smaller
    /// classes make fewer drops when a strict-handling order is on board.
    pub fn default_table(retail: &Channel, strict: &Channel) -> Self {
        Self::sorted(vec![
            VehicleClass::new("4W", 3000.0, 12).with_drop_override(strict.clone(), 8),
            VehicleClass::new("6W", 6000.0, 8).with_drop_override(strict.clone(), 5),
            VehicleClass::new("10W", 13000.0, 4)
                .with_channel_rule(ChannelRule::AllShare(retail.clone())),
        ])
    }

    /// Load a table from a JSON rules file
    pub fn from_json_path(path: &Path) -> Result<Self, RulesError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: RulesFile = serde_json::from_str(&raw).map_err(|source| RulesError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(file.classes)
    }

    /// Apply one min-load strategy to every class except the smallest
    pub fn with_min_load_strategy(self, strategy: MinLoadStrategy) -> Result<Self, RulesError> {
        let last = self.classes.len() - 1;
        let classes = self
            .classes
            .into_iter()
            .enumerate()
            .map(|(i, class)| if i < last { class.with_min_load(strategy) } else { class })
            .collect();
        Self::new(classes)
    }

    pub fn classes(&self) -> &[VehicleClass] {
        &self.classes
    }

    /// Classify an order set; `None` when no class can carry it
    pub fn classify<'a>(&self, orders: impl IntoIterator<Item = &'a Order>) -> Option<&VehicleClass> {
        self.classify_profile(&LoadProfile::from_orders(orders))
    }

    pub fn classify_profile(&self, load: &LoadProfile) -> Option<&VehicleClass> {
        if load.is_empty() {
            return None;
        }

        let fitting: Vec<usize> = (0..self.classes.len())
            .filter(|&i| self.fits(&self.classes[i], load))
            .collect();

        fitting
            .iter()
            .find(|&&i| self.triggers(i, load))
            .or_else(|| fitting.last())
            .map(|&i| &self.classes[i])
    }

    /// Whether some class can carry the load
    pub fn is_feasible(&self, load: &LoadProfile) -> bool {
        !load.is_empty() && self.classes.iter().any(|class| self.fits(class, load))
    }

    /// Drop ceiling for `class`, reduced when the override channel is present
    pub fn effective_max_drops(class: &VehicleClass, load: &LoadProfile) -> u32 {
        match &class.drop_override {
            Some(o) if load.carries(&o.channel) => class.max_drops.min(o.max_drops),
            _ => class.max_drops,
        }
    }

    fn fits(&self, class: &VehicleClass, load: &LoadProfile) -> bool {
        if round_kg(load.weight_kg) > class.max_weight_kg {
            return false;
        }
        if load.drops > Self::effective_max_drops(class, load) {
            return false;
        }
        if class.max_cases.is_some_and(|max| load.cases > max) {
            return false;
        }
        match &class.channel_rule {
            ChannelRule::Any => true,
            ChannelRule::AllShare(channel) => load.all_share(channel),
        }
    }

    fn triggers(&self, index: usize, load: &LoadProfile) -> bool {
        let class = &self.classes[index];
        match class.min_load {
            MinLoadStrategy::None => false,
            MinLoadStrategy::ExceedsSmallerCeiling => self.classes[index + 1..]
                .iter()
                .find(|smaller| smaller.max_weight_kg < class.max_weight_kg)
                .is_some_and(|smaller| round_kg(load.weight_kg) > smaller.max_weight_kg),
            MinLoadStrategy::SingleOrderFraction(fraction) => {
                load.heaviest_order_kg >= fraction * class.max_weight_kg
            }
            MinLoadStrategy::TotalLoadFraction(fraction) => {
                round_kg(load.weight_kg) >= fraction * class.max_weight_kg
            }
        }
    }
}
