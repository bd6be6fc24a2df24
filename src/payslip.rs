//! Payslip generation.
//!
//! When a payroll request is approved, every active employee of its
//! company receives one payslip that freezes their pay breakdown.  A
//! payslip is keyed by (request, employee): generation skips employees
//! who already have one, so re-running a batch only fills the gaps.

use crate::engine::{compute_line, fetch_active_employees};
use crate::error::{PayrollError, Result};
use crate::models::{Employee, PayrollRequest, Payslip, PayslipDetails, PayslipStatus};
use crate::store::Storage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

/// Outcome of one generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    /// Active employees of the company at generation time.
    pub employee_count: usize,
    /// Payslips created by this run.
    pub generated: usize,
    /// Employees who already had a payslip for the request.
    pub already_present: usize,
    /// Employees whose payslip could not be created, with the error.
    pub failed: Vec<FailedPayslip>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPayslip {
    pub employee_id: String,
    pub error: String,
}

impl GenerationReport {
    /// Payslips that exist for the request after this run.
    pub fn covered(&self) -> usize {
        self.generated + self.already_present
    }

    pub fn is_complete(&self) -> bool {
        self.covered() == self.employee_count
    }
}

/// Build the payslip of one employee for an approved request.
pub fn build_payslip(request: &PayrollRequest, employee: &Employee, now: DateTime<Utc>) -> Payslip {
    let line = compute_line(employee, request.deductions_for(&employee.id));
    Payslip {
        id: String::new(),
        payroll_request_id: request.id.clone(),
        employee_id: employee.id.clone(),
        company_id: request.company_id.clone(),
        payroll_period: request.payroll_period,
        details: PayslipDetails {
            basic_salary: line.basic_salary,
            allowances: line.allowances,
            base_deductions: line.base_deductions,
            additional_deductions: line.additional_deductions,
            total_additional_deductions: line.total_additional_deductions,
            total_deductions: line.total_deductions,
            gross_pay: line.gross_pay,
            net_pay: line.net_pay,
            iban: employee.payroll_info.iban.clone(),
        },
        status: PayslipStatus::Generated,
        sent_at: None,
        viewed_at: None,
        created_at: now,
    }
}

/// Create the missing payslips of an approved request.
///
/// Failing to read the employee list aborts the run.  A failure to
/// create an individual payslip is logged and recorded in the report;
/// the remaining employees are still processed.
pub async fn generate(
    storage: &Storage,
    request: &PayrollRequest,
    cap: usize,
    now: DateTime<Utc>,
) -> Result<GenerationReport> {
    let employees =
        fetch_active_employees(storage.employees.as_ref(), &request.company_id, cap).await?;

    let active: HashSet<&str> = employees.iter().map(|e| e.id.as_str()).collect();
    for entry in &request.employee_deductions {
        if !active.contains(entry.employee_id.as_str()) {
            tracing::warn!(
                request_id = %request.id,
                employee_id = %entry.employee_id,
                "Employee with stored deductions is no longer active, no payslip created"
            );
        }
    }

    let mut report = GenerationReport {
        employee_count: employees.len(),
        ..Default::default()
    };
    for employee in &employees {
        match create_one(storage, request, employee, now).await {
            Ok(true) => report.generated += 1,
            Ok(false) => report.already_present += 1,
            Err(err) => {
                tracing::error!(
                    request_id = %request.id,
                    employee_id = %employee.id,
                    error = %err,
                    "Failed to create payslip"
                );
                report.failed.push(FailedPayslip {
                    employee_id: employee.id.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    tracing::info!(
        request_id = %request.id,
        generated = report.generated,
        already_present = report.already_present,
        failed = report.failed.len(),
        employees = report.employee_count,
        "Payslip batch finished"
    );
    Ok(report)
}

/// Returns whether a payslip was created (`false` when one existed).
async fn create_one(
    storage: &Storage,
    request: &PayrollRequest,
    employee: &Employee,
    now: DateTime<Utc>,
) -> Result<bool> {
    if storage
        .payslips
        .find_by_request_and_employee(&request.id, &employee.id)
        .await?
        .is_some()
    {
        return Ok(false);
    }
    match storage
        .payslips
        .insert(build_payslip(request, employee, now))
        .await
    {
        Ok(_) => Ok(true),
        // Lost a race with another run for the same pair.
        Err(PayrollError::Conflict(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

impl Payslip {
    /// Move the payslip forward to `to`, stamping `sent_at` on entering
    /// `sent` and `viewed_at` on first entering `downloaded` or
    /// `viewed`.  Moving backwards is refused; the current status is a
    /// no-op.
    pub fn advance(&mut self, to: PayslipStatus, now: DateTime<Utc>) -> Result<()> {
        if to == self.status {
            return Ok(());
        }
        if to < self.status {
            return Err(PayrollError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        if to == PayslipStatus::Sent && self.sent_at.is_none() {
            self.sent_at = Some(now);
        }
        if matches!(to, PayslipStatus::Downloaded | PayslipStatus::Viewed) && self.viewed_at.is_none() {
            self.viewed_at = Some(now);
        }
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DeductionKind, DeductionRule, EmployeeDeductions, EmployeeStatus, PayrollInfo,
        PayrollStatus, PayrollSummary,
    };
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap()
    }

    fn employee(id: &str, basic: Decimal, status: EmployeeStatus) -> Employee {
        let mut info = PayrollInfo {
            basic_salary: basic,
            iban: Some("sa44 2000 0001 2345 6789 1234".into()),
            ..Default::default()
        };
        info.recompute();
        Employee {
            id: id.into(),
            company_id: "co-1".into(),
            employee_code: id.to_uppercase(),
            full_name: format!("Employee {id}"),
            status,
            payroll_info: info,
        }
    }

    fn approved_request() -> PayrollRequest {
        PayrollRequest {
            id: "req-1".into(),
            company_id: "co-1".into(),
            payroll_period: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            employee_deductions: vec![EmployeeDeductions {
                employee_id: "e2".into(),
                deductions: vec![DeductionRule {
                    kind: DeductionKind::Gosi {
                        gosi_percentage: dec!(10),
                    },
                    calculated_amount: dec!(300),
                }],
            }],
            summary: PayrollSummary::default(),
            total_amount: Decimal::ZERO,
            status: PayrollStatus::Approved,
            submitted_by: None,
            reviewed_by: Some("admin-1".into()),
            reviewed_at: Some(now()),
            rejection_reason: None,
            invoice_number: None,
            notes: None,
            payslip_batch: None,
            version: 1,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[tokio::test]
    async fn test_generate_one_payslip_per_active_employee() {
        let storage = Storage::in_memory();
        storage.employees.save(employee("e1", dec!(5000), EmployeeStatus::Active)).await.unwrap();
        storage.employees.save(employee("e2", dec!(3000), EmployeeStatus::Active)).await.unwrap();
        storage.employees.save(employee("e3", dec!(4000), EmployeeStatus::Terminated)).await.unwrap();
        let request = approved_request();

        let report = generate(&storage, &request, 1000, now()).await.unwrap();
        assert_eq!(report.employee_count, 2);
        assert_eq!(report.generated, 2);
        assert!(report.is_complete());

        let slip = storage
            .payslips
            .find_by_request_and_employee("req-1", "e2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(slip.status, PayslipStatus::Generated);
        assert_eq!(slip.details.total_additional_deductions, dec!(300));
        assert_eq!(slip.details.net_pay, dec!(2700));
        assert_eq!(slip.details.additional_deductions[0].description, "GOSI 10%");
        assert_eq!(slip.details.iban.as_deref(), Some("SA4420000001234567891234"));
        assert_eq!(slip.title("Sara Ali"), "Sara Ali - October 2026");

        // A second run finds everything in place.
        let rerun = generate(&storage, &request, 1000, now()).await.unwrap();
        assert_eq!(rerun.generated, 0);
        assert_eq!(rerun.already_present, 2);
        assert_eq!(storage.payslips.list_by_request("req-1").await.unwrap().len(), 2);
    }

    #[test]
    fn test_advance_moves_forward_only() {
        let request = approved_request();
        let mut slip = build_payslip(&request, &employee("e1", dec!(1000), EmployeeStatus::Active), now());
        let later = now() + chrono::Duration::hours(1);

        slip.advance(PayslipStatus::Sent, now()).unwrap();
        assert_eq!(slip.sent_at, Some(now()));
        slip.advance(PayslipStatus::Downloaded, later).unwrap();
        assert_eq!(slip.viewed_at, Some(later));
        slip.advance(PayslipStatus::Viewed, later + chrono::Duration::hours(1)).unwrap();
        assert_eq!(slip.viewed_at, Some(later));

        let err = slip.advance(PayslipStatus::Sent, later).unwrap_err();
        assert!(matches!(err, PayrollError::InvalidTransition { .. }));
        assert_eq!(slip.status, PayslipStatus::Viewed);
    }
}
