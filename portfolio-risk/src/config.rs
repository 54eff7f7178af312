//! Risk evaluator configuration

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// What the evaluator reports when its own data reads fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFailMode {
    /// Allow the trade and flag `RISK_CHECK_UNAVAILABLE`.
    ///
    /// This favours availability over safety: a datastore outage lets trades
    /// through without any risk limits applied.
    #[default]
    FailOpen,
    /// Reject the trade with `RISK_CHECK_FAILED`
    FailClosed,
}

/// Overall risk evaluation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Behaviour when trade history or kill switches cannot be read
    #[serde(default)]
    pub fail_mode: RiskFailMode,

    /// Fraction of a ceiling above which advisory flags are raised
    #[serde(default = "default_flag_threshold")]
    pub flag_threshold: Decimal,

    /// Capital de-risking applied ahead of the hard limits
    #[serde(default)]
    pub derisk: DeriskConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            fail_mode: RiskFailMode::FailOpen,
            flag_threshold: default_flag_threshold(),
            derisk: DeriskConfig::default(),
        }
    }
}

fn default_flag_threshold() -> Decimal {
    dec!(0.8)
}

/// Capital scaling once drawdown or exposure approach their ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeriskConfig {
    /// Fraction of the drawdown ceiling that triggers scaling
    #[serde(default = "default_drawdown_threshold")]
    pub drawdown_threshold: Decimal,

    /// Capital multiplier applied on drawdown
    #[serde(default = "default_drawdown_factor")]
    pub drawdown_factor: Decimal,

    /// Fraction of the total exposure ceiling that triggers scaling
    #[serde(default = "default_exposure_threshold")]
    pub exposure_threshold: Decimal,

    /// Capital multiplier applied on exposure
    #[serde(default = "default_exposure_factor")]
    pub exposure_factor: Decimal,
}

impl Default for DeriskConfig {
    fn default() -> Self {
        Self {
            drawdown_threshold: default_drawdown_threshold(),
            drawdown_factor: default_drawdown_factor(),
            exposure_threshold: default_exposure_threshold(),
            exposure_factor: default_exposure_factor(),
        }
    }
}

fn default_drawdown_threshold() -> Decimal {
    dec!(0.6)
}

fn default_drawdown_factor() -> Decimal {
    dec!(0.7)
}

fn default_exposure_threshold() -> Decimal {
    dec!(0.6)
}

fn default_exposure_factor() -> Decimal {
    dec!(0.8)
}
