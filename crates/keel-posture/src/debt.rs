//! Debt ranking and payoff analysis.
//!
//! Each liability scores as estimated annual interest + minimum payment +
//! payoff readiness × 100; ranking is by score, then APR, then minimum
//! payment, then id. An optional payoff amount is applied greedily down
//! the ranking.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use keel_core::error::KeelError;
use keel_core::money;

const MAX_LIABILITY_ID_LEN: usize = 64;
const BLOCKED_ID_TOKENS: [&str; 5] = ["secret", "token", "password", "api_key", "apikey"];

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiabilityInput {
    pub liability_id: String,
    pub current_balance: String,
    pub apr: String,
    pub minimum_payment: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebtRequest {
    pub liabilities: Vec<LiabilityInput>,
    #[serde(default)]
    pub optional_payoff_amount: Option<String>,
    #[serde(default)]
    pub reserve_floor: Option<String>,
    pub correlation_id: String,
}

#[derive(Clone, Debug)]
struct Liability {
    liability_id: String,
    current_balance: Decimal,
    apr: Decimal,
    minimum_payment: Decimal,
}

fn validate_liability_id(id: &str) -> Result<(), KeelError> {
    if id.is_empty() || id.len() > MAX_LIABILITY_ID_LEN {
        return Err(KeelError::Validation(format!(
            "liability_id must be 1..={MAX_LIABILITY_ID_LEN} characters"
        )));
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b':' | b'-'))
    {
        return Err(KeelError::Validation(
            "liability_id may only contain [A-Za-z0-9._:-]".into(),
        ));
    }
    let lowered = id.to_ascii_lowercase();
    if BLOCKED_ID_TOKENS.iter().any(|token| lowered.contains(token)) {
        return Err(KeelError::Validation(
            "liability_id contains disallowed secret-like text".into(),
        ));
    }
    Ok(())
}

fn non_negative(label: &str, raw: &str) -> Result<Decimal, KeelError> {
    let value = money::parse_amount(raw)?;
    if value < Decimal::ZERO {
        return Err(KeelError::Validation(format!("{label} must be non-negative")));
    }
    Ok(value)
}

fn estimated_annual_interest(liability: &Liability) -> Decimal {
    money::quantize(liability.current_balance * liability.apr / Decimal::ONE_HUNDRED)
}

fn payoff_readiness(liability: &Liability, payoff_amount: Option<Decimal>) -> Decimal {
    let Some(payoff) = payoff_amount else {
        return Decimal::ZERO;
    };
    if payoff == Decimal::ZERO {
        return Decimal::ZERO;
    }
    if liability.current_balance == Decimal::ZERO {
        return Decimal::ONE;
    }
    let ratio = (payoff / liability.current_balance).min(Decimal::ONE);
    money::quantize(ratio)
}

fn score(liability: &Liability, payoff_amount: Option<Decimal>) -> (Decimal, Decimal, Decimal) {
    let annual_interest = estimated_annual_interest(liability);
    let readiness = payoff_readiness(liability, payoff_amount);
    let total = money::quantize(
        annual_interest + liability.minimum_payment + readiness * Decimal::ONE_HUNDRED,
    );
    (total, annual_interest, readiness)
}

pub fn debt_fields(request: &DebtRequest) -> Result<Map<String, Value>, KeelError> {
    if request.liabilities.is_empty() {
        return Err(KeelError::Validation(
            "at least one liability is required".into(),
        ));
    }
    let mut seen = std::collections::BTreeSet::new();
    let mut liabilities = Vec::with_capacity(request.liabilities.len());
    for input in &request.liabilities {
        validate_liability_id(&input.liability_id)?;
        if !seen.insert(input.liability_id.clone()) {
            return Err(KeelError::Validation(
                "liability_id values must be unique".into(),
            ));
        }
        liabilities.push(Liability {
            liability_id: input.liability_id.clone(),
            current_balance: non_negative("current_balance", &input.current_balance)?,
            apr: non_negative("apr", &input.apr)?,
            minimum_payment: non_negative("minimum_payment", &input.minimum_payment)?,
        });
    }
    let payoff_amount = request
        .optional_payoff_amount
        .as_deref()
        .map(|raw| non_negative("optional_payoff_amount", raw))
        .transpose()?;
    let reserve_floor = non_negative(
        "reserve_floor",
        request.reserve_floor.as_deref().unwrap_or("0.0000"),
    )?;

    let mut scored: Vec<(Liability, Decimal, Decimal, Decimal)> = liabilities
        .into_iter()
        .map(|liability| {
            let (total, annual_interest, readiness) = score(&liability, payoff_amount);
            (liability, total, annual_interest, readiness)
        })
        .collect();
    scored.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| b.0.apr.cmp(&a.0.apr))
            .then_with(|| b.0.minimum_payment.cmp(&a.0.minimum_payment))
            .then_with(|| a.0.liability_id.cmp(&b.0.liability_id))
    });

    let mut remaining_payoff = payoff_amount.unwrap_or(Decimal::ZERO);
    let mut total_interest_saved = Decimal::ZERO;
    let mut total_cashflow_freed = Decimal::ZERO;
    let mut total_reserve_impact = Decimal::ZERO;
    let mut ranked = Vec::with_capacity(scored.len());

    for (rank, (liability, total, annual_interest, readiness)) in scored.iter().enumerate() {
        let payoff_applied = remaining_payoff.min(liability.current_balance);
        let post_payoff_balance = money::quantize(liability.current_balance - payoff_applied);
        let interest_saved =
            money::quantize(payoff_applied * liability.apr / Decimal::ONE_HUNDRED);
        let cashflow_freed = if post_payoff_balance == Decimal::ZERO {
            liability.minimum_payment
        } else {
            Decimal::ZERO
        };
        let reserve_impact = money::quantize(-payoff_applied);

        remaining_payoff = money::quantize(remaining_payoff - payoff_applied);
        total_interest_saved = money::quantize(total_interest_saved + interest_saved);
        total_cashflow_freed = money::quantize(total_cashflow_freed + cashflow_freed);
        total_reserve_impact = money::quantize(total_reserve_impact + reserve_impact);

        ranked.push(json!({
            "rank": rank + 1,
            "liability_id": liability.liability_id,
            "current_balance": money::format_amount(liability.current_balance),
            "apr": money::format_amount(liability.apr),
            "minimum_payment": money::format_amount(liability.minimum_payment),
            "score": money::format_amount(*total),
            "estimated_annual_interest": money::format_amount(*annual_interest),
            "payoff_applied": money::format_amount(payoff_applied),
            "post_payoff_balance": money::format_amount(post_payoff_balance),
            "interest_saved": money::format_amount(interest_saved),
            "cashflow_freed": money::format_amount(cashflow_freed),
            "reserve_impact": money::format_amount(reserve_impact),
            "explanation": {
                "annual_interest_cost": money::format_amount(*annual_interest),
                "cashflow_pressure": money::format_amount(liability.minimum_payment),
                "payoff_readiness": money::format_amount(*readiness),
            },
        }));
    }

    let mut fields = Map::new();
    fields.insert(
        "optional_payoff_amount".into(),
        json!(payoff_amount.map(money::format_amount)),
    );
    fields.insert("reserve_floor".into(), json!(money::format_amount(reserve_floor)));
    fields.insert(
        "total_interest_saved".into(),
        json!(money::format_amount(total_interest_saved)),
    );
    fields.insert(
        "total_cashflow_freed".into(),
        json!(money::format_amount(total_cashflow_freed)),
    );
    fields.insert(
        "total_reserve_impact".into(),
        json!(money::format_amount(total_reserve_impact)),
    );
    fields.insert("ranked_liabilities".into(), Value::Array(ranked));
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn liability(id: &str, balance: &str, apr: &str, minimum: &str) -> LiabilityInput {
        LiabilityInput {
            liability_id: id.to_string(),
            current_balance: balance.to_string(),
            apr: apr.to_string(),
            minimum_payment: minimum.to_string(),
        }
    }

    fn request(liabilities: Vec<LiabilityInput>, payoff: Option<&str>) -> DebtRequest {
        DebtRequest {
            liabilities,
            optional_payoff_amount: payoff.map(str::to_string),
            reserve_floor: None,
            correlation_id: "c1".to_string(),
        }
    }

    #[test]
    fn ranks_by_score_then_apr() {
        let fields = debt_fields(&request(
            vec![
                liability("card-low", "1000.0000", "5.0000", "25.0000"),
                liability("card-high", "1000.0000", "25.0000", "25.0000"),
            ],
            None,
        ))
        .unwrap();
        let ranked = fields["ranked_liabilities"].as_array().unwrap();
        assert_eq!(ranked[0]["liability_id"], "card-high");
        // 1000 * 25% = 250 annual interest + 25 minimum payment.
        assert_eq!(ranked[0]["score"], "275.0000");
        assert_eq!(ranked[1]["liability_id"], "card-low");
    }

    #[test]
    fn payoff_applies_greedily_down_the_ranking() {
        let fields = debt_fields(&request(
            vec![
                liability("card-a", "300.0000", "20.0000", "30.0000"),
                liability("card-b", "500.0000", "10.0000", "20.0000"),
            ],
            Some("400.0000"),
        ))
        .unwrap();
        let ranked = fields["ranked_liabilities"].as_array().unwrap();

        // card-a ranks first and is fully paid off.
        assert_eq!(ranked[0]["liability_id"], "card-a");
        assert_eq!(ranked[0]["payoff_applied"], "300.0000");
        assert_eq!(ranked[0]["post_payoff_balance"], "0.0000");
        assert_eq!(ranked[0]["cashflow_freed"], "30.0000");

        // The remaining 100 lands on card-b.
        assert_eq!(ranked[1]["payoff_applied"], "100.0000");
        assert_eq!(ranked[1]["post_payoff_balance"], "400.0000");
        assert_eq!(ranked[1]["cashflow_freed"], "0.0000");

        assert_eq!(fields["total_reserve_impact"], "-400.0000");
        // 300 * 20% + 100 * 10% = 70 saved.
        assert_eq!(fields["total_interest_saved"], "70.0000");
    }

    #[test]
    fn secret_like_ids_rejected() {
        for id in ["api_key-1", "my-secret", "TOKEN-2"] {
            let result = debt_fields(&request(
                vec![liability(id, "100.0000", "10.0000", "5.0000")],
                None,
            ));
            assert!(result.unwrap_err().is_validation(), "id {id} should fail");
        }
    }

    #[test]
    fn duplicate_or_empty_inputs_rejected() {
        assert!(debt_fields(&request(vec![], None)).unwrap_err().is_validation());
        let result = debt_fields(&request(
            vec![
                liability("dup", "100.0000", "10.0000", "5.0000"),
                liability("dup", "200.0000", "12.0000", "6.0000"),
            ],
            None,
        ));
        assert!(result.unwrap_err().is_validation());
    }
}
