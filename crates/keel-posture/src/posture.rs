//! Capital posture: reserve targets, liquidity surplus, risk bands.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use keel_core::error::KeelError;
use keel_core::money;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RiskBand {
    Critical,
    Elevated,
    Guarded,
    Stable,
}

impl RiskBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBand::Critical => "critical",
            RiskBand::Elevated => "elevated",
            RiskBand::Guarded => "guarded",
            RiskBand::Stable => "stable",
        }
    }
}

/// Discrete classification of the reserve ratio.
pub fn risk_band_for(reserve_ratio: Decimal) -> RiskBand {
    if reserve_ratio < Decimal::new(5_000, 4) {
        RiskBand::Critical
    } else if reserve_ratio < Decimal::new(10_000, 4) {
        RiskBand::Elevated
    } else if reserve_ratio < Decimal::new(15_000, 4) {
        RiskBand::Guarded
    } else {
        RiskBand::Stable
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostureRequest {
    pub liquidity: String,
    pub fixed_burn: String,
    pub variable_burn: String,
    pub minimum_reserve: String,
    #[serde(default)]
    pub volatility_buffer: Option<String>,
    pub correlation_id: String,
}

#[derive(Clone, Copy, Debug)]
pub struct PostureInputs {
    pub liquidity: Decimal,
    pub fixed_burn: Decimal,
    pub variable_burn: Decimal,
    pub minimum_reserve: Decimal,
    pub volatility_buffer: Decimal,
}

impl PostureInputs {
    /// Parse and validate wire amounts. Burn and reserve inputs must be
    /// non-negative; liquidity may be negative.
    pub fn parse(request: &PostureRequest) -> Result<Self, KeelError> {
        let parse_non_negative = |label: &str, raw: &str| -> Result<Decimal, KeelError> {
            let value = money::parse_amount(raw)?;
            if value < Decimal::ZERO {
                return Err(KeelError::Validation(format!(
                    "{label} must be non-negative"
                )));
            }
            Ok(value)
        };
        Ok(Self {
            liquidity: money::parse_amount(&request.liquidity)?,
            fixed_burn: parse_non_negative("fixed_burn", &request.fixed_burn)?,
            variable_burn: parse_non_negative("variable_burn", &request.variable_burn)?,
            minimum_reserve: parse_non_negative("minimum_reserve", &request.minimum_reserve)?,
            volatility_buffer: parse_non_negative(
                "volatility_buffer",
                request.volatility_buffer.as_deref().unwrap_or("0.0000"),
            )?,
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PostureMetrics {
    pub fixed_burn: Decimal,
    pub variable_burn: Decimal,
    pub volatility_buffer: Decimal,
    pub reserve_target: Decimal,
    pub liquidity: Decimal,
    pub liquidity_surplus: Decimal,
    pub reserve_ratio: Decimal,
    pub risk_band: RiskBand,
}

/// Reserve target is minimum reserve plus volatility buffer; the ratio of
/// liquidity to that target drives the risk band. A zero target reports a
/// zero ratio rather than dividing.
pub fn compute_posture_metrics(inputs: PostureInputs) -> PostureMetrics {
    let reserve_target = money::quantize(inputs.minimum_reserve + inputs.volatility_buffer);
    let liquidity_surplus = money::quantize(inputs.liquidity - reserve_target);
    let reserve_ratio = if reserve_target == Decimal::ZERO {
        Decimal::ZERO
    } else {
        money::quantize(inputs.liquidity / reserve_target)
    };
    PostureMetrics {
        fixed_burn: inputs.fixed_burn,
        variable_burn: inputs.variable_burn,
        volatility_buffer: inputs.volatility_buffer,
        reserve_target,
        liquidity: inputs.liquidity,
        liquidity_surplus,
        reserve_ratio,
        risk_band: risk_band_for(reserve_ratio),
    }
}

/// Response fields for `compute_capital_posture`, ready for the caller to
/// stamp.
pub fn posture_fields(inputs: PostureInputs) -> Map<String, Value> {
    let metrics = compute_posture_metrics(inputs);
    let mut fields = Map::new();
    fields.insert("fixed_burn".into(), json!(money::format_amount(metrics.fixed_burn)));
    fields.insert(
        "variable_burn".into(),
        json!(money::format_amount(metrics.variable_burn)),
    );
    fields.insert(
        "volatility_buffer".into(),
        json!(money::format_amount(metrics.volatility_buffer)),
    );
    fields.insert(
        "reserve_target".into(),
        json!(money::format_amount(metrics.reserve_target)),
    );
    fields.insert("liquidity".into(), json!(money::format_amount(metrics.liquidity)));
    fields.insert(
        "liquidity_surplus".into(),
        json!(money::format_amount(metrics.liquidity_surplus)),
    );
    fields.insert(
        "reserve_ratio".into(),
        json!(money::format_amount(metrics.reserve_ratio)),
    );
    fields.insert("risk_band".into(), json!(metrics.risk_band.as_str()));
    fields.insert(
        "explanation".into(),
        json!({
            "contributing_balances": [
                {"name": "liquidity", "amount": money::format_amount(metrics.liquidity)},
                {"name": "fixed_burn", "amount": money::format_amount(metrics.fixed_burn)},
                {"name": "variable_burn", "amount": money::format_amount(metrics.variable_burn)},
            ],
            "reserve_assumptions": {
                "minimum_reserve": money::format_amount(inputs.minimum_reserve),
                "volatility_buffer": money::format_amount(metrics.volatility_buffer),
                "reserve_target": money::format_amount(metrics.reserve_target),
            },
        }),
    );
    fields
}
