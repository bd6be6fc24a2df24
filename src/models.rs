//! Data models for the Payroll Engine.
//!
//! The `models` module defines the serialisable records the engine
//! reads and writes: companies, employees and their pay components,
//! payroll requests with their per-employee deduction overrides,
//! payslips and notifications.  They derive `Serialize` and
//! `Deserialize` so that they can be persisted by any store or sent
//! over the HTTP interface unchanged.

use crate::money::{round2, Money};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of the user performing an operation.  Authorization itself is
/// decided outside the engine; the role only influences which data an
/// operation records (e.g. employers are pinned to their own company).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Employer,
}

/// The acting user, passed explicitly into every engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
    /// The company an employer belongs to.  Unused for super admins.
    pub company_id: Option<String>,
}

impl Actor {
    pub fn admin(user_id: impl Into<String>) -> Self {
        Actor {
            user_id: user_id.into(),
            role: Role::SuperAdmin,
            company_id: None,
        }
    }

    pub fn employer(user_id: impl Into<String>, company_id: impl Into<String>) -> Self {
        Actor {
            user_id: user_id.into(),
            role: Role::Employer,
            company_id: Some(company_id.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyStatus {
    Active,
    Inactive,
}

/// A client company whose employees are paid through the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    #[serde(default)]
    pub id: String,
    pub legal_name: String,
    pub status: CompanyStatus,
}

/// Employment status.  Only `Active` employees take part in payroll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeStatus {
    Active,
    Inactive,
    Terminated,
}

/// Fixed monthly pay components of an employee.
///
/// `gross_pay` and `net_salary` are derived and recomputed by
/// [`PayrollInfo::recompute`] every time the employee is saved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayrollInfo {
    /// Fixed base pay before allowances and deductions.
    pub basic_salary: Money,
    /// Additive fixed pay components (housing, transport, ...).
    #[serde(default)]
    pub allowances: Money,
    /// Recurring fixed deductions applied every period.
    #[serde(default)]
    pub deductions: Money,
    #[serde(default)]
    pub gross_pay: Money,
    #[serde(default)]
    pub net_salary: Money,
    /// Bank account the salary is paid into.
    #[serde(default)]
    pub iban: Option<String>,
}

impl PayrollInfo {
    /// Round the pay components to two places, recompute the derived
    /// pay figures and normalise the IBAN.
    pub fn recompute(&mut self) {
        self.basic_salary = round2(self.basic_salary);
        self.allowances = round2(self.allowances);
        self.deductions = round2(self.deductions);
        self.gross_pay = self.basic_salary + self.allowances;
        self.net_salary = self.gross_pay - self.deductions;
        if let Some(iban) = self.iban.take() {
            let cleaned: String = iban
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_uppercase();
            self.iban = if cleaned.is_empty() { None } else { Some(cleaned) };
        }
    }
}

/// Length of a Saudi IBAN: `SA` followed by 22 digits.
pub const SAUDI_IBAN_LEN: usize = 24;

/// Check a normalised IBAN against the Saudi format.
pub fn check_saudi_iban(iban: &str) -> std::result::Result<(), &'static str> {
    if !iban.starts_with("SA") || iban.len() != SAUDI_IBAN_LEN {
        return Err("IBAN must start with \"SA\" and be exactly 24 characters long.");
    }
    if !iban[2..].bytes().all(|b| b.is_ascii_digit()) {
        return Err("IBAN must contain only digits after \"SA\".");
    }
    Ok(())
}

/// An employee of a company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    /// Record identifier assigned by the store.
    #[serde(default)]
    pub id: String,
    /// Ignored for employers, who always save into their own company.
    #[serde(default)]
    pub company_id: String,
    /// The company's own employee number.  Unique within a company.
    pub employee_code: String,
    pub full_name: String,
    pub status: EmployeeStatus,
    pub payroll_info: PayrollInfo,
}

impl Employee {
    /// Short label used in log lines and validation messages.
    pub fn label(&self) -> String {
        format!("{} ({})", self.full_name, self.employee_code)
    }
}

/// The kind of an additional deduction applied through a payroll
/// request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeductionKind {
    /// Statutory social insurance, a percentage of the basic salary.
    Gosi { gosi_percentage: Decimal },
    /// A one-off fixed amount (salary advance, penalty, ...).  The
    /// reason is mandatory and at most ten characters long.
    Fixed {
        fixed_amount: Money,
        #[serde(default)]
        reason: Option<String>,
    },
}

/// One deduction rule for one employee in a payroll request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeductionRule {
    #[serde(flatten)]
    pub kind: DeductionKind,
    /// Amount derived from `kind` and the employee's basic salary.
    /// Written by the deduction calculator; ignored on input.
    #[serde(default)]
    pub calculated_amount: Money,
}

impl DeductionRule {
    pub fn new(kind: DeductionKind) -> Self {
        DeductionRule {
            kind,
            calculated_amount: Money::ZERO,
        }
    }
}

/// The deduction overrides for a single employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeDeductions {
    /// Record identifier of the employee ([`Employee::id`]).
    pub employee_id: String,
    pub deductions: Vec<DeductionRule>,
}

impl EmployeeDeductions {
    pub fn total(&self) -> Money {
        self.deductions.iter().map(|d| d.calculated_amount).sum()
    }
}

/// Company-wide payroll totals for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollSummary {
    pub employees_count: usize,
    pub total_basic_salary: Money,
    pub total_allowances: Money,
    /// Sum of the employees' recurring deductions.
    pub total_base_deductions: Money,
    /// Sum of the request's additional deduction rules.
    pub total_additional_deductions: Money,
    /// Base plus additional deductions.
    pub total_deductions: Money,
    pub total_gross_pay: Money,
    pub total_net_pay: Money,
}

/// Lifecycle status of a payroll request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayrollStatus {
    New,
    UnderReview,
    Approved,
    Rejected,
    InvoiceGenerated,
    Processed,
}

impl PayrollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayrollStatus::New => "new",
            PayrollStatus::UnderReview => "under_review",
            PayrollStatus::Approved => "approved",
            PayrollStatus::Rejected => "rejected",
            PayrollStatus::InvoiceGenerated => "invoice_generated",
            PayrollStatus::Processed => "processed",
        }
    }

    /// Statuses that record who reviewed the request and when.
    pub fn is_reviewed(&self) -> bool {
        matches!(
            self,
            PayrollStatus::Approved
                | PayrollStatus::Rejected
                | PayrollStatus::InvoiceGenerated
                | PayrollStatus::Processed
        )
    }

    /// Statuses in which the deduction list and company may still change.
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            PayrollStatus::New | PayrollStatus::UnderReview | PayrollStatus::Rejected
        )
    }

    /// Statuses at which payslips must exist for the request.
    pub fn has_payslips(&self) -> bool {
        matches!(
            self,
            PayrollStatus::Approved | PayrollStatus::InvoiceGenerated | PayrollStatus::Processed
        )
    }
}

impl fmt::Display for PayrollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of the payslip batch started by an approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PayslipBatch {
    /// Approval accepted, generation not yet finished.
    Pending,
    /// Every active employee has a payslip.
    Complete { generated: usize },
    /// Some employees are still missing a payslip.
    Partial { generated: usize, expected: usize },
}

impl PayslipBatch {
    pub fn is_incomplete(&self) -> bool {
        !matches!(self, PayslipBatch::Complete { .. })
    }
}

/// A payroll submission for one company and one calendar month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayrollRequest {
    pub id: String,
    pub company_id: String,
    /// First day of the month the request pays for.
    pub payroll_period: NaiveDate,
    pub employee_deductions: Vec<EmployeeDeductions>,
    pub summary: PayrollSummary,
    /// What the company owes for this request: the total net pay.
    pub total_amount: Money,
    pub status: PayrollStatus,
    pub submitted_by: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub invoice_number: Option<String>,
    pub notes: Option<String>,
    pub payslip_batch: Option<PayslipBatch>,
    /// Revision counter used for optimistic concurrency.  Stores bump
    /// it on every successful update.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayrollRequest {
    /// Display title, e.g. `"Acme Trading - October 2026"`.
    pub fn title(&self, company_name: &str) -> String {
        format!("{} - {}", company_name, month_label(self.payroll_period))
    }

    /// Stored deduction rules of one employee, if the request has any.
    pub fn deductions_for(&self, employee_id: &str) -> Option<&EmployeeDeductions> {
        self.employee_deductions
            .iter()
            .find(|entry| entry.employee_id == employee_id)
    }
}

/// Normalise a date to the first day of its month.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Human-readable month, e.g. `"October 2026"`.
pub fn month_label(date: NaiveDate) -> String {
    date.format("%B %Y").to_string()
}

/// One additional deduction as it appears on a payslip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalDeduction {
    /// `"gosi"` or `"fixed"`.
    pub deduction_type: String,
    pub description: String,
    pub amount: Money,
}

/// The pay breakdown frozen into a payslip at approval time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayslipDetails {
    pub basic_salary: Money,
    pub allowances: Money,
    /// The employee's recurring deductions.
    pub base_deductions: Money,
    pub additional_deductions: Vec<AdditionalDeduction>,
    pub total_additional_deductions: Money,
    /// Base plus additional deductions.
    pub total_deductions: Money,
    pub gross_pay: Money,
    pub net_pay: Money,
    pub iban: Option<String>,
}

/// Delivery status of a payslip.  Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayslipStatus {
    Generated,
    Sent,
    Downloaded,
    Viewed,
}

impl PayslipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayslipStatus::Generated => "generated",
            PayslipStatus::Sent => "sent",
            PayslipStatus::Downloaded => "downloaded",
            PayslipStatus::Viewed => "viewed",
        }
    }
}

impl fmt::Display for PayslipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An employee's pay breakdown for one approved payroll request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payslip {
    pub id: String,
    pub payroll_request_id: String,
    pub employee_id: String,
    pub company_id: String,
    pub payroll_period: NaiveDate,
    pub details: PayslipDetails,
    pub status: PayslipStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Payslip {
    /// Display title, e.g. `"Sara Ali - October 2026"`.
    pub fn title(&self, employee_name: &str) -> String {
        format!("{} - {}", employee_name, month_label(self.payroll_period))
    }
}

/// Text carried in both supported languages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub en: String,
    pub ar: String,
}

/// Who a notification goes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "recipient_type", content = "recipients", rename_all = "snake_case")]
pub enum RecipientTarget {
    /// Every active company.
    All,
    /// An explicit list of company ids.
    Specific(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Draft,
    Sent,
    Failed,
}

/// A message composed once and fanned out to companies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: LocalizedText,
    pub message: LocalizedText,
    pub target: RecipientTarget,
    pub sent_by: Option<String>,
    pub status: NotificationStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed,
    Pending,
}

/// A user who read a delivered notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

/// Delivery of one notification to one company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecipient {
    pub id: String,
    pub notification_id: String,
    pub company_id: String,
    pub is_read: bool,
    pub delivered_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub delivery_status: DeliveryStatus,
    pub read_by: Vec<ReadReceipt>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_recompute_derives_gross_and_net() {
        let mut info = PayrollInfo {
            basic_salary: dec!(5000),
            allowances: dec!(750.50),
            deductions: dec!(250),
            iban: Some(" sa03 8000 0000 6080 1016 7519 ".into()),
            ..Default::default()
        };
        info.recompute();
        assert_eq!(info.gross_pay, dec!(5750.50));
        assert_eq!(info.net_salary, dec!(5500.50));
        assert_eq!(info.iban.as_deref(), Some("SA0380000000608010167519"));

        // Recomputing again changes nothing.
        let before = info.clone();
        info.recompute();
        assert_eq!(info, before);
    }

    #[test]
    fn test_deduction_rule_wire_format() {
        let rule: DeductionRule = serde_json::from_value(serde_json::json!({
            "type": "fixed",
            "fixed_amount": 200,
            "reason": "Advance"
        }))
        .unwrap();
        assert_eq!(
            rule.kind,
            DeductionKind::Fixed {
                fixed_amount: dec!(200),
                reason: Some("Advance".into())
            }
        );
        assert_eq!(rule.calculated_amount, Money::ZERO);

        let gosi: DeductionRule =
            serde_json::from_value(serde_json::json!({"type": "gosi", "gosi_percentage": "9.75"}))
                .unwrap();
        assert_eq!(
            gosi.kind,
            DeductionKind::Gosi {
                gosi_percentage: dec!(9.75)
            }
        );
    }

    #[test]
    fn test_recompute_rounds_components() {
        let mut info = PayrollInfo {
            basic_salary: dec!(1000.005),
            allowances: dec!(0.004),
            ..Default::default()
        };
        info.recompute();
        assert_eq!(info.basic_salary, dec!(1000.01));
        assert_eq!(info.allowances, dec!(0));
        assert_eq!(info.gross_pay, dec!(1000.01));
    }

    #[test]
    fn test_saudi_iban_format() {
        assert!(check_saudi_iban("SA0380000000608010167519").is_ok());
        assert!(check_saudi_iban("GB0380000000608010167519").is_err());
        assert!(check_saudi_iban("SA038000000060801016751").is_err());
        assert!(check_saudi_iban("SA03800000006080101675AB").is_err());
        // Multi-byte input must not panic on slicing.
        assert!(check_saudi_iban("SAé38000000060801016751").is_err());
    }

    #[test]
    fn test_month_helpers() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(month_start(date), NaiveDate::from_ymd_opt(2026, 10, 1).unwrap());
        assert_eq!(month_label(date), "October 2026");
    }

    #[test]
    fn test_payslip_status_order() {
        assert!(PayslipStatus::Generated < PayslipStatus::Sent);
        assert!(PayslipStatus::Downloaded < PayslipStatus::Viewed);
    }
}
