//! Additional deduction calculation.
//!
//! A payroll request may carry extra deductions per employee on top of
//! the employee's recurring ones.  Each [`DeductionRule`] is either a
//! GOSI percentage of the basic salary or a fixed amount with a short
//! reason.  This module turns a rule into its calculated amount and
//! validates it against the employee's basic salary.  It has no side
//! effects; callers persist the amounts it writes onto the rules.

use crate::error::{PayrollError, Result};
use crate::models::{DeductionKind, DeductionRule, Employee};
use crate::money::{percent_of, Money};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

/// Highest GOSI percentage a rule may carry.
pub const MAX_GOSI_PERCENTAGE: Decimal = dec!(99);

/// Longest reason accepted on a fixed-amount rule, in characters.
pub const MAX_REASON_CHARS: usize = 10;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeductionError {
    #[error("GOSI percentage {0} is outside 0-99")]
    PercentageOutOfRange(Decimal),
    #[error("fixed amount {0} must be greater than zero")]
    NonPositiveAmount(Money),
    #[error("fixed amount {amount} exceeds basic salary {basic_salary}")]
    ExceedsBasicSalary { amount: Money, basic_salary: Money },
    #[error("a reason is required for fixed-amount deductions")]
    MissingReason,
    #[error("reason \"{0}\" is longer than 10 characters")]
    ReasonTooLong(String),
}

/// Compute the amount a rule deducts from an employee with the given
/// basic salary.
pub fn calculate(basic_salary: Money, kind: &DeductionKind) -> std::result::Result<Money, DeductionError> {
    match kind {
        DeductionKind::Gosi { gosi_percentage } => {
            let pct = *gosi_percentage;
            if pct < Decimal::ZERO || pct > MAX_GOSI_PERCENTAGE {
                return Err(DeductionError::PercentageOutOfRange(pct));
            }
            Ok(percent_of(basic_salary, pct))
        }
        DeductionKind::Fixed {
            fixed_amount,
            reason,
        } => {
            let reason = reason.as_deref().map(str::trim).unwrap_or_default();
            if reason.is_empty() {
                return Err(DeductionError::MissingReason);
            }
            if reason.chars().count() > MAX_REASON_CHARS {
                return Err(DeductionError::ReasonTooLong(reason.to_string()));
            }
            if *fixed_amount <= Money::ZERO {
                return Err(DeductionError::NonPositiveAmount(*fixed_amount));
            }
            if *fixed_amount > basic_salary {
                return Err(DeductionError::ExceedsBasicSalary {
                    amount: *fixed_amount,
                    basic_salary,
                });
            }
            Ok(*fixed_amount)
        }
    }
}

/// Calculate every rule of one employee, writing `calculated_amount`
/// onto each.  The first invalid rule aborts with a validation error
/// naming the employee; no rule is touched in that case.
pub fn apply_rules(employee: &Employee, rules: &mut [DeductionRule]) -> Result<Money> {
    let basic_salary = employee.payroll_info.basic_salary;
    let amounts = rules
        .iter()
        .map(|rule| calculate(basic_salary, &rule.kind))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| {
            PayrollError::validation(format!(
                "deduction for employee {}: {}",
                employee.label(),
                err
            ))
        })?;
    for (rule, amount) in rules.iter_mut().zip(&amounts) {
        rule.calculated_amount = *amount;
    }
    Ok(amounts.into_iter().sum())
}

/// Payslip line description for a rule.
pub fn describe(kind: &DeductionKind) -> (String, String) {
    match kind {
        DeductionKind::Gosi { gosi_percentage } => (
            "gosi".to_string(),
            format!("GOSI {}%", gosi_percentage.normalize()),
        ),
        DeductionKind::Fixed { reason, .. } => (
            "fixed".to_string(),
            reason.clone().unwrap_or_default(),
        ),
    }
}
