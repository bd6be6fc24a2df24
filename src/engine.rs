//! Payroll aggregation engine.
//!
//! The `engine` module turns a company's active employees plus the
//! per-employee deduction overrides of a payroll request into a
//! [`PayrollSummary`].  Per-employee lines are computed in parallel
//! with the [`rayon`] crate and then summed in employee order.  All
//! arithmetic is exact decimal arithmetic, so aggregating the same
//! inputs twice yields identical totals.

use crate::deduction::describe;
use crate::error::{PayrollError, Result};
use crate::models::{AdditionalDeduction, Employee, EmployeeDeductions, PayrollSummary};
use crate::money::Money;
use crate::store::EmployeeStore;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

/// Pay breakdown of one employee for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct PayLine {
    pub employee_id: String,
    pub basic_salary: Money,
    pub allowances: Money,
    pub base_deductions: Money,
    pub additional_deductions: Vec<AdditionalDeduction>,
    pub total_additional_deductions: Money,
    pub total_deductions: Money,
    pub gross_pay: Money,
    pub net_pay: Money,
}

/// Compute one employee's line from their pay components and the
/// request's stored rules for them (already calculated).
pub fn compute_line(employee: &Employee, overrides: Option<&EmployeeDeductions>) -> PayLine {
    let info = &employee.payroll_info;
    let additional_deductions: Vec<AdditionalDeduction> = overrides
        .map(|entry| {
            entry
                .deductions
                .iter()
                .map(|rule| {
                    let (deduction_type, description) = describe(&rule.kind);
                    AdditionalDeduction {
                        deduction_type,
                        description,
                        amount: rule.calculated_amount,
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    let total_additional_deductions: Money =
        additional_deductions.iter().map(|d| d.amount).sum();
    let gross_pay = info.basic_salary + info.allowances;
    let total_deductions = info.deductions + total_additional_deductions;
    PayLine {
        employee_id: employee.id.clone(),
        basic_salary: info.basic_salary,
        allowances: info.allowances,
        base_deductions: info.deductions,
        additional_deductions,
        total_additional_deductions,
        total_deductions,
        gross_pay,
        net_pay: gross_pay - total_deductions,
    }
}

/// Compute every employee's line, in the order of `employees`.
pub fn compute_lines(employees: &[Employee], overrides: &[EmployeeDeductions]) -> Vec<PayLine> {
    let by_employee: HashMap<&str, &EmployeeDeductions> = overrides
        .iter()
        .map(|entry| (entry.employee_id.as_str(), entry))
        .collect();

    let known: HashSet<&str> = employees.iter().map(|e| e.id.as_str()).collect();
    for entry in overrides {
        if !known.contains(entry.employee_id.as_str()) {
            tracing::warn!(
                employee_id = %entry.employee_id,
                "Deduction override for an employee who is not active in the company, skipping"
            );
        }
    }

    employees
        .par_iter()
        .map(|employee| compute_line(employee, by_employee.get(employee.id.as_str()).copied()))
        .collect()
}

/// Sum per-employee lines into company-wide totals.
pub fn summarize(lines: &[PayLine]) -> PayrollSummary {
    let mut summary = PayrollSummary {
        employees_count: lines.len(),
        ..Default::default()
    };
    for line in lines {
        summary.total_basic_salary += line.basic_salary;
        summary.total_allowances += line.allowances;
        summary.total_base_deductions += line.base_deductions;
        summary.total_additional_deductions += line.total_additional_deductions;
        summary.total_gross_pay += line.gross_pay;
    }
    summary.total_deductions = summary.total_base_deductions + summary.total_additional_deductions;
    summary.total_net_pay = summary.total_gross_pay - summary.total_deductions;
    summary
}

/// Read a company's active employees, refusing to truncate.
///
/// One more record than `cap` is requested so that a company above the
/// cap is detected and reported as [`PayrollError::ResourceExhausted`].
pub async fn fetch_active_employees(
    employees: &dyn EmployeeStore,
    company_id: &str,
    cap: usize,
) -> Result<Vec<Employee>> {
    let found = employees
        .find_active_by_company(company_id, cap.saturating_add(1))
        .await?;
    if found.len() > cap {
        return Err(PayrollError::ResourceExhausted(format!(
            "company {company_id} has more than {cap} active employees"
        )));
    }
    Ok(found)
}

/// Aggregate the payroll of a company for a set of deduction overrides.
pub async fn aggregate(
    employees: &dyn EmployeeStore,
    company_id: &str,
    overrides: &[EmployeeDeductions],
    cap: usize,
) -> Result<PayrollSummary> {
    let active = fetch_active_employees(employees, company_id, cap).await?;
    let lines = compute_lines(&active, overrides);
    let summary = summarize(&lines);
    tracing::debug!(
        company_id,
        employees = summary.employees_count,
        total_net_pay = %summary.total_net_pay,
        "Aggregated payroll"
    );
    Ok(summary)
}
