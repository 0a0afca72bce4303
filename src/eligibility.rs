// 7.0: eligibility port. KYC and tier decisions are made elsewhere; the engine only asks.
// 7.1 TierPolicy is a static table for deployments without a live tier service.

use crate::types::{AssetClass, HolderId, Instrument, Multiplier, Quote};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy)]
pub struct EligibilityRequest<'a> {
    pub holder: HolderId,
    pub instrument: &'a Instrument,
    pub investment: Quote,
    pub multiplier: Multiplier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Allowed,
    Denied(String),
}

pub trait EligibilityCheck: Send + Sync {
    fn check(&self, request: &EligibilityRequest<'_>) -> Eligibility;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl EligibilityCheck for AllowAll {
    fn check(&self, _request: &EligibilityRequest<'_>) -> Eligibility {
        Eligibility::Allowed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierLimit {
    pub tier: u8,
    pub max_multiplier: u32,
    // None = no cap
    pub max_investment: Option<Decimal>,
    // empty = every asset class
    #[serde(default)]
    pub asset_classes: Vec<AssetClass>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderTier {
    pub holder: u64,
    pub tier: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EligibilityConfig {
    pub default_tier: u8,
    pub blocked: Vec<u64>,
    pub holder_tiers: Vec<HolderTier>,
    pub tiers: Vec<TierLimit>,
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            default_tier: 1,
            blocked: Vec::new(),
            holder_tiers: Vec::new(),
            tiers: vec![
                TierLimit { tier: 1, max_multiplier: 100, max_investment: Some(Decimal::new(10_000, 0)), asset_classes: Vec::new() },
                TierLimit { tier: 2, max_multiplier: 500, max_investment: Some(Decimal::new(100_000, 0)), asset_classes: Vec::new() },
                TierLimit { tier: 3, max_multiplier: 1000, max_investment: None, asset_classes: Vec::new() },
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct TierPolicy {
    default_tier: u8,
    blocked: HashSet<HolderId>,
    holder_tiers: HashMap<HolderId, u8>,
    limits: HashMap<u8, TierLimit>,
}

impl TierPolicy {
    pub fn from_config(config: &EligibilityConfig) -> Self {
        Self {
            default_tier: config.default_tier,
            blocked: config.blocked.iter().copied().map(HolderId).collect(),
            holder_tiers: config
                .holder_tiers
                .iter()
                .map(|ht| (HolderId(ht.holder), ht.tier))
                .collect(),
            limits: config.tiers.iter().map(|l| (l.tier, l.clone())).collect(),
        }
    }

    pub fn tier_of(&self, holder: HolderId) -> u8 {
        self.holder_tiers.get(&holder).copied().unwrap_or(self.default_tier)
    }
}

impl EligibilityCheck for TierPolicy {
    fn check(&self, request: &EligibilityRequest<'_>) -> Eligibility {
        if self.blocked.contains(&request.holder) {
            return Eligibility::Denied("holder is blocked from margin trading".to_string());
        }

        let tier = self.tier_of(request.holder);
        let Some(limit) = self.limits.get(&tier) else {
            return Eligibility::Denied(format!("tier {tier} may not open margin positions"));
        };

        if request.multiplier.value() > limit.max_multiplier {
            return Eligibility::Denied(format!(
                "multiplier {} exceeds tier {tier} limit of {}x",
                request.multiplier.value(),
                limit.max_multiplier
            ));
        }
        if let Some(max) = limit.max_investment {
            if request.investment.value() > max {
                return Eligibility::Denied(format!(
                    "investment {} exceeds tier {tier} limit of {max}",
                    request.investment
                ));
            }
        }
        if !limit.asset_classes.is_empty() && !limit.asset_classes.contains(&request.instrument.asset_class) {
            return Eligibility::Denied(format!(
                "{} trading is not enabled for tier {tier}",
                request.instrument.asset_class
            ));
        }

        Eligibility::Allowed
    }
}
