//! Multi-entity posture consolidation.
//!
//! Each entity's posture is computed over transfer-neutral liquidity
//! (inter-entity transfer legs net out), then a consolidated roll-up runs
//! over the summed inputs. Entity and transfer-pair ordering is
//! deterministic.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use keel_core::error::KeelError;
use keel_core::money;

use crate::posture::{compute_posture_metrics, PostureInputs};

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityPostureInput {
    pub entity_id: String,
    pub liquidity: String,
    pub fixed_burn: String,
    pub variable_burn: String,
    pub minimum_reserve: String,
    #[serde(default)]
    pub volatility_buffer: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferLeg {
    pub transfer_id: String,
    pub entity_id: String,
    pub counterparty_entity_id: String,
    /// `in` credits the entity, `out` debits it.
    pub direction: String,
    pub amount: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsolidationRequest {
    pub entity_ids: Vec<String>,
    pub entities: Vec<EntityPostureInput>,
    #[serde(default)]
    pub inter_entity_transfers: Vec<TransferLeg>,
    pub correlation_id: String,
}

fn parsed_entity(input: &EntityPostureInput) -> Result<PostureInputs, KeelError> {
    Ok(PostureInputs {
        liquidity: money::parse_amount(&input.liquidity)?,
        fixed_burn: money::parse_amount(&input.fixed_burn)?,
        variable_burn: money::parse_amount(&input.variable_burn)?,
        minimum_reserve: money::parse_amount(&input.minimum_reserve)?,
        volatility_buffer: money::parse_amount(
            input.volatility_buffer.as_deref().unwrap_or("0.0000"),
        )?,
    })
}

pub fn consolidation_fields(request: &ConsolidationRequest) -> Result<Map<String, Value>, KeelError> {
    let mut selected: Vec<String> = request.entity_ids.clone();
    selected.sort();
    selected.dedup();

    let inputs_by_entity: BTreeMap<&str, &EntityPostureInput> = request
        .entities
        .iter()
        .map(|e| (e.entity_id.as_str(), e))
        .collect();
    for entity_id in &selected {
        if !inputs_by_entity.contains_key(entity_id.as_str()) {
            return Err(KeelError::Validation(format!(
                "no posture inputs supplied for entity '{entity_id}'"
            )));
        }
    }

    // Net transfer effect per entity and one row per transfer pair.
    let mut transfer_net: BTreeMap<String, Decimal> = selected
        .iter()
        .map(|id| (id.clone(), Decimal::ZERO))
        .collect();
    let mut transfer_groups: BTreeMap<String, Vec<&TransferLeg>> = BTreeMap::new();
    for leg in &request.inter_entity_transfers {
        transfer_groups
            .entry(leg.transfer_id.clone())
            .or_default()
            .push(leg);
    }

    let mut transfer_pairs = Vec::new();
    for (transfer_id, legs) in &transfer_groups {
        for leg in legs {
            let amount = money::parse_amount(&leg.amount)?;
            let entry = transfer_net
                .entry(leg.entity_id.clone())
                .or_insert(Decimal::ZERO);
            match leg.direction.as_str() {
                "in" => *entry = money::quantize(*entry + amount),
                "out" => *entry = money::quantize(*entry - amount),
                other => {
                    return Err(KeelError::Validation(format!(
                        "transfer direction must be in|out, got '{other}'"
                    )))
                }
            }
        }
        let first = legs[0];
        let mut involved = vec![first.entity_id.clone(), first.counterparty_entity_id.clone()];
        involved.sort();
        transfer_pairs.push(json!({
            "transfer_id": transfer_id,
            "entity_a_id": involved[0],
            "entity_b_id": involved[1],
            "amount": money::format_amount(money::parse_amount(&first.amount)?),
        }));
    }

    let mut entities = Vec::with_capacity(selected.len());
    let mut consolidated = PostureInputs {
        liquidity: Decimal::ZERO,
        fixed_burn: Decimal::ZERO,
        variable_burn: Decimal::ZERO,
        minimum_reserve: Decimal::ZERO,
        volatility_buffer: Decimal::ZERO,
    };

    for entity_id in &selected {
        let raw = parsed_entity(inputs_by_entity[entity_id.as_str()])?;
        let net = transfer_net.get(entity_id).copied().unwrap_or(Decimal::ZERO);
        let neutral_liquidity = money::quantize(raw.liquidity - net);
        let metrics = compute_posture_metrics(PostureInputs {
            liquidity: neutral_liquidity,
            ..raw
        });

        entities.push(json!({
            "entity_id": entity_id,
            "liquidity": money::format_amount(raw.liquidity),
            "transfer_net": money::format_amount(net),
            "transfer_neutral_liquidity": money::format_amount(metrics.liquidity),
            "fixed_burn": money::format_amount(metrics.fixed_burn),
            "variable_burn": money::format_amount(metrics.variable_burn),
            "minimum_reserve": money::format_amount(raw.minimum_reserve),
            "volatility_buffer": money::format_amount(metrics.volatility_buffer),
            "reserve_target": money::format_amount(metrics.reserve_target),
            "liquidity_surplus": money::format_amount(metrics.liquidity_surplus),
            "reserve_ratio": money::format_amount(metrics.reserve_ratio),
            "risk_band": metrics.risk_band.as_str(),
        }));

        consolidated.liquidity = money::quantize(consolidated.liquidity + metrics.liquidity);
        consolidated.fixed_burn = money::quantize(consolidated.fixed_burn + metrics.fixed_burn);
        consolidated.variable_burn =
            money::quantize(consolidated.variable_burn + metrics.variable_burn);
        consolidated.minimum_reserve =
            money::quantize(consolidated.minimum_reserve + raw.minimum_reserve);
        consolidated.volatility_buffer =
            money::quantize(consolidated.volatility_buffer + metrics.volatility_buffer);
    }

    let rollup = compute_posture_metrics(consolidated);

    let mut fields = Map::new();
    fields.insert("entity_ids".into(), json!(selected));
    fields.insert("entities".into(), Value::Array(entities));
    fields.insert("transfer_pairs".into(), Value::Array(transfer_pairs));
    fields.insert("fixed_burn".into(), json!(money::format_amount(rollup.fixed_burn)));
    fields.insert(
        "variable_burn".into(),
        json!(money::format_amount(rollup.variable_burn)),
    );
    fields.insert(
        "volatility_buffer".into(),
        json!(money::format_amount(rollup.volatility_buffer)),
    );
    fields.insert(
        "reserve_target".into(),
        json!(money::format_amount(rollup.reserve_target)),
    );
    fields.insert("liquidity".into(), json!(money::format_amount(rollup.liquidity)));
    fields.insert(
        "liquidity_surplus".into(),
        json!(money::format_amount(rollup.liquidity_surplus)),
    );
    fields.insert(
        "reserve_ratio".into(),
        json!(money::format_amount(rollup.reserve_ratio)),
    );
    fields.insert("risk_band".into(), json!(rollup.risk_band.as_str()));
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(entity_id: &str, liquidity: &str, reserve: &str) -> EntityPostureInput {
        EntityPostureInput {
            entity_id: entity_id.to_string(),
            liquidity: liquidity.to_string(),
            fixed_burn: "10.0000".to_string(),
            variable_burn: "0.0000".to_string(),
            minimum_reserve: reserve.to_string(),
            volatility_buffer: None,
        }
    }

    #[test]
    fn transfers_net_out_of_entity_liquidity() {
        let request = ConsolidationRequest {
            entity_ids: vec!["ent-b".into(), "ent-a".into()],
            entities: vec![
                entity("ent-a", "200.0000", "100.0000"),
                entity("ent-b", "100.0000", "100.0000"),
            ],
            inter_entity_transfers: vec![
                TransferLeg {
                    transfer_id: "x-1".into(),
                    entity_id: "ent-a".into(),
                    counterparty_entity_id: "ent-b".into(),
                    direction: "in".into(),
                    amount: "50.0000".into(),
                },
                TransferLeg {
                    transfer_id: "x-1".into(),
                    entity_id: "ent-b".into(),
                    counterparty_entity_id: "ent-a".into(),
                    direction: "out".into(),
                    amount: "50.0000".into(),
                },
            ],
            correlation_id: "c1".into(),
        };
        let fields = consolidation_fields(&request).unwrap();

        // Entities are reported in sorted order.
        let entities = fields["entities"].as_array().unwrap();
        assert_eq!(entities[0]["entity_id"], "ent-a");
        // ent-a received 50, so its transfer-neutral liquidity drops to 150.
        assert_eq!(entities[0]["transfer_neutral_liquidity"], "150.0000");
        // ent-b sent 50, so its neutral liquidity rises to 150.
        assert_eq!(entities[1]["transfer_neutral_liquidity"], "150.0000");

        // The transfer itself never changes the consolidated totals.
        assert_eq!(fields["liquidity"], "300.0000");
        assert_eq!(fields["reserve_target"], "200.0000");
        assert_eq!(fields["risk_band"], "stable");

        let pairs = fields["transfer_pairs"].as_array().unwrap();
        assert_eq!(pairs[0]["entity_a_id"], "ent-a");
        assert_eq!(pairs[0]["entity_b_id"], "ent-b");
    }

    #[test]
    fn missing_entity_inputs_rejected() {
        let request = ConsolidationRequest {
            entity_ids: vec!["ent-a".into(), "ent-b".into()],
            entities: vec![entity("ent-a", "100.0000", "50.0000")],
            inter_entity_transfers: vec![],
            correlation_id: "c1".into(),
        };
        assert!(consolidation_fields(&request).unwrap_err().is_validation());
    }

    #[test]
    fn invalid_direction_rejected() {
        let request = ConsolidationRequest {
            entity_ids: vec!["ent-a".into()],
            entities: vec![entity("ent-a", "100.0000", "50.0000")],
            inter_entity_transfers: vec![TransferLeg {
                transfer_id: "x-1".into(),
                entity_id: "ent-a".into(),
                counterparty_entity_id: "ent-b".into(),
                direction: "sideways".into(),
                amount: "1.0000".into(),
            }],
            correlation_id: "c1".into(),
        };
        assert!(consolidation_fields(&request).unwrap_err().is_validation());
    }
}
