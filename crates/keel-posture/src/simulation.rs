//! Spend simulation over monthly periods.

use chrono::{Datelike, Days, NaiveDate};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use keel_core::error::KeelError;
use keel_core::{money, time};

const MAX_HORIZON_PERIODS: u32 = 120;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpendInput {
    pub spend_id: String,
    pub amount: String,
    #[serde(rename = "type")]
    pub spend_type: String,
    #[serde(default)]
    pub spend_date: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub cadence: Option<String>,
    #[serde(default)]
    pub occurrences: Option<u32>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationRequest {
    pub starting_liquidity: String,
    pub start_date: String,
    pub horizon_periods: u32,
    #[serde(default)]
    pub spends: Vec<SpendInput>,
    pub correlation_id: String,
}

#[derive(Clone, Debug)]
enum Spend {
    OneTime {
        amount: Decimal,
        spend_date: NaiveDate,
    },
    Recurring {
        amount: Decimal,
        occurrence_dates: Vec<NaiveDate>,
    },
}

/// Month arithmetic with day-of-month clamping (Jan 31 + 1 month =
/// Feb 28/29).
fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    let zero_based = date.month0() + months;
    let year = date.year() + (zero_based / 12) as i32;
    let month = zero_based % 12 + 1;
    let mut day = date.day();
    loop {
        if let Some(result) = NaiveDate::from_ymd_opt(year, month, day) {
            return result;
        }
        day -= 1;
    }
}

fn parse_spend(input: &SpendInput) -> Result<(String, Spend), KeelError> {
    let amount = money::parse_amount(&input.amount)?;
    if amount < Decimal::ZERO {
        return Err(KeelError::Validation("spend amount must be non-negative".into()));
    }
    let occurrences = input.occurrences.unwrap_or(1);
    if occurrences == 0 {
        return Err(KeelError::Validation("occurrences must be at least 1".into()));
    }

    match input.spend_type.as_str() {
        "one_time" => {
            if input.start_date.is_some() {
                return Err(KeelError::Validation(
                    "start_date is not allowed for one_time spends".into(),
                ));
            }
            if occurrences != 1 {
                return Err(KeelError::Validation(
                    "occurrences must be 1 for one_time spends".into(),
                ));
            }
            let spend_date = input.spend_date.as_deref().ok_or_else(|| {
                KeelError::Validation("spend_date is required for one_time spends".into())
            })?;
            Ok((
                input.spend_id.clone(),
                Spend::OneTime {
                    amount,
                    spend_date: time::parse_date(spend_date)?,
                },
            ))
        }
        "recurring" => {
            if input.spend_date.is_some() {
                return Err(KeelError::Validation(
                    "spend_date is not allowed for recurring spends".into(),
                ));
            }
            let start = input.start_date.as_deref().ok_or_else(|| {
                KeelError::Validation("start_date is required for recurring spends".into())
            })?;
            let start = time::parse_date(start)?;
            let cadence = input.cadence.as_deref().unwrap_or("monthly");
            let occurrence_dates: Vec<NaiveDate> = match cadence {
                "monthly" => (0..occurrences).map(|i| add_months(start, i)).collect(),
                "weekly" => (0..occurrences)
                    .map(|i| start + Days::new(7 * i as u64))
                    .collect(),
                other => {
                    return Err(KeelError::Validation(format!(
                        "cadence must be monthly|weekly, got '{other}'"
                    )))
                }
            };
            Ok((
                input.spend_id.clone(),
                Spend::Recurring {
                    amount,
                    occurrence_dates,
                },
            ))
        }
        other => Err(KeelError::Validation(format!(
            "spend type must be one_time|recurring, got '{other}'"
        ))),
    }
}

/// Project liquidity across monthly periods, charging one-time and
/// recurring spends into the periods their dates fall in.
pub fn simulation_fields(request: &SimulationRequest) -> Result<Map<String, Value>, KeelError> {
    if request.horizon_periods == 0 || request.horizon_periods > MAX_HORIZON_PERIODS {
        return Err(KeelError::Validation(format!(
            "horizon_periods must be in 1..={MAX_HORIZON_PERIODS}"
        )));
    }
    let starting_liquidity = money::parse_amount(&request.starting_liquidity)?;
    let start_date = time::parse_date(&request.start_date)?;

    let mut seen = std::collections::BTreeSet::new();
    let mut spends = Vec::with_capacity(request.spends.len());
    for input in &request.spends {
        if !seen.insert(input.spend_id.clone()) {
            return Err(KeelError::Validation("spend_id values must be unique".into()));
        }
        spends.push(parse_spend(input)?);
    }
    spends.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut current_liquidity = starting_liquidity;
    let mut periods = Vec::with_capacity(request.horizon_periods as usize);
    for period_index in 0..request.horizon_periods {
        let period_start = add_months(start_date, period_index);
        let period_end = add_months(period_start, 1) - Days::new(1);

        let mut one_time_total = Decimal::ZERO;
        let mut recurring_total = Decimal::ZERO;
        for (_, spend) in &spends {
            match spend {
                Spend::OneTime { amount, spend_date } => {
                    if (period_start..=period_end).contains(spend_date) {
                        one_time_total = money::quantize(one_time_total + amount);
                    }
                }
                Spend::Recurring {
                    amount,
                    occurrence_dates,
                } => {
                    for date in occurrence_dates {
                        if (period_start..=period_end).contains(date) {
                            recurring_total = money::quantize(recurring_total + amount);
                        }
                    }
                }
            }
        }

        let total_spend = money::quantize(one_time_total + recurring_total);
        current_liquidity = money::quantize(current_liquidity - total_spend);
        periods.push(json!({
            "period_index": period_index,
            "period_start": period_start.to_string(),
            "period_end": period_end.to_string(),
            "one_time_total": money::format_amount(one_time_total),
            "recurring_total": money::format_amount(recurring_total),
            "total_spend": money::format_amount(total_spend),
            "ending_liquidity": money::format_amount(current_liquidity),
        }));
    }

    let mut fields = Map::new();
    fields.insert(
        "starting_liquidity".into(),
        json!(money::format_amount(starting_liquidity)),
    );
    fields.insert("periods".into(), Value::Array(periods));
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_time(spend_id: &str, amount: &str, date: &str) -> SpendInput {
        SpendInput {
            spend_id: spend_id.to_string(),
            amount: amount.to_string(),
            spend_type: "one_time".to_string(),
            spend_date: Some(date.to_string()),
            start_date: None,
            cadence: None,
            occurrences: None,
        }
    }

    fn recurring(spend_id: &str, amount: &str, start: &str, occurrences: u32) -> SpendInput {
        SpendInput {
            spend_id: spend_id.to_string(),
            amount: amount.to_string(),
            spend_type: "recurring".to_string(),
            spend_date: None,
            start_date: Some(start.to_string()),
            cadence: Some("monthly".to_string()),
            occurrences: Some(occurrences),
        }
    }

    fn request(spends: Vec<SpendInput>, horizon: u32) -> SimulationRequest {
        SimulationRequest {
            starting_liquidity: "1000.0000".to_string(),
            start_date: "2026-01-01".to_string(),
            horizon_periods: horizon,
            spends,
            correlation_id: "c1".to_string(),
        }
    }

    #[test]
    fn month_arithmetic_clamps_day() {
        let jan31 = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        assert_eq!(add_months(jan31, 1).to_string(), "2026-02-28");
        assert_eq!(add_months(jan31, 3).to_string(), "2026-04-30");
        // 2028 is a leap year.
        let jan31_leap = NaiveDate::from_ymd_opt(2028, 1, 31).unwrap();
        assert_eq!(add_months(jan31_leap, 1).to_string(), "2028-02-29");
    }

    #[test]
    fn spends_land_in_their_periods() {
        let fields = simulation_fields(&request(
            vec![
                one_time("laptop", "200.0000", "2026-02-15"),
                recurring("rent", "100.0000", "2026-01-01", 3),
            ],
            3,
        ))
        .unwrap();
        let periods = fields["periods"].as_array().unwrap();

        assert_eq!(periods[0]["recurring_total"], "100.0000");
        assert_eq!(periods[0]["one_time_total"], "0.0000");
        assert_eq!(periods[0]["ending_liquidity"], "900.0000");

        assert_eq!(periods[1]["one_time_total"], "200.0000");
        assert_eq!(periods[1]["total_spend"], "300.0000");
        assert_eq!(periods[1]["ending_liquidity"], "600.0000");

        assert_eq!(periods[2]["ending_liquidity"], "500.0000");
    }

    #[test]
    fn duplicate_spend_ids_rejected() {
        let result = simulation_fields(&request(
            vec![
                one_time("dup", "1.0000", "2026-01-05"),
                one_time("dup", "2.0000", "2026-01-06"),
            ],
            1,
        ));
        assert!(result.unwrap_err().is_validation());
    }

    #[test]
    fn branch_fields_are_enforced() {
        let mut bad = one_time("a", "1.0000", "2026-01-05");
        bad.start_date = Some("2026-01-01".to_string());
        assert!(simulation_fields(&request(vec![bad], 1)).unwrap_err().is_validation());

        let mut bad = recurring("b", "1.0000", "2026-01-01", 2);
        bad.spend_date = Some("2026-01-05".to_string());
        assert!(simulation_fields(&request(vec![bad], 1)).unwrap_err().is_validation());
    }

    #[test]
    fn horizon_bounds_enforced() {
        assert!(simulation_fields(&request(vec![], 0)).unwrap_err().is_validation());
        assert!(simulation_fields(&request(vec![], 121)).unwrap_err().is_validation());
        assert!(simulation_fields(&request(vec![], 120)).is_ok());
    }
}
