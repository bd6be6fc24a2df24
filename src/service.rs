//! Payroll orchestration.
//!
//! [`PayrollService`] is the entry point the outer layers (HTTP, admin
//! tooling) call.  It validates input, runs the deduction calculator
//! and the aggregator, persists records, plans status transitions and
//! executes their side effects.  The acting user and the current time
//! are always passed in explicitly.
//!
//! Approval and payslip generation are not one transaction.  The
//! approval is persisted first with the payslip batch marked pending;
//! the batch outcome is persisted afterwards.  Requests left pending or
//! partial are picked up again by [`PayrollService::reconcile_payslips`].

use crate::config::EngineConfig;
use crate::deduction::apply_rules;
use crate::engine::aggregate;
use crate::error::{PayrollError, Result};
use crate::models::{
    check_saudi_iban, month_start, Actor, Company, Employee, EmployeeDeductions, LocalizedText, Notification,
    NotificationRecipient, PayrollRequest, PayrollStatus, PayrollSummary, Payslip, PayslipBatch,
    PayslipStatus, RecipientTarget, Role,
};
use crate::notification::{self, DeliveryReport, UnreadFeed};
use crate::payslip::{self, GenerationReport};
use crate::store::Storage;
use crate::workflow::{apply_effects, plan_transition, Effect, TransitionInput};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// Payload of a new payroll request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPayrollRequest {
    /// Required for super admins; employers always submit for their
    /// own company.
    #[serde(default)]
    pub company_id: Option<String>,
    /// Any day of the month being paid.
    pub payroll_period: NaiveDate,
    #[serde(default)]
    pub employee_deductions: Vec<EmployeeDeductions>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Changes to an existing payroll request.  Absent fields are left as
/// they are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayrollRequestPatch {
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub employee_deductions: Option<Vec<EmployeeDeductions>>,
    #[serde(default)]
    pub notes: Option<String>,
    /// When set, the update is refused unless the stored request is at
    /// this version.
    #[serde(default)]
    pub expected_version: Option<u64>,
}

/// A requested status change.
#[derive(Debug, Clone, Deserialize)]
pub struct TransitionCommand {
    pub to: PayrollStatus,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

/// Result of a status change and of the side effects run for it.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub request: PayrollRequest,
    pub changed: bool,
    /// Set when the transition started a payslip batch that ran.
    pub payslips: Option<GenerationReport>,
    /// Set when the company was notified.
    pub delivery: Option<DeliveryReport>,
}

pub struct PayrollService {
    storage: Storage,
    config: EngineConfig,
    request_locks: parking_lot::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PayrollService {
    pub fn new(storage: Storage, config: EngineConfig) -> Self {
        PayrollService {
            storage,
            config,
            request_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Per-request lock serialising updates and transitions of one
    /// request.  Locks nobody holds are dropped from the table.
    fn lock_for(&self, request_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.request_locks.lock();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(request_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn load_request(&self, id: &str) -> Result<PayrollRequest> {
        self.storage
            .requests
            .get(id)
            .await?
            .ok_or_else(|| PayrollError::not_found("payroll request", id))
    }

    async fn load_company(&self, id: &str) -> Result<Company> {
        self.storage
            .companies
            .get(id)
            .await?
            .ok_or_else(|| PayrollError::not_found("company", id))
    }

    pub async fn get_request(&self, id: &str) -> Result<PayrollRequest> {
        self.load_request(id).await
    }

    /// Load a request as seen by `actor`.  Employers only see their own
    /// company's requests.
    pub async fn request_for(&self, actor: &Actor, id: &str) -> Result<PayrollRequest> {
        let request = self.load_request(id).await?;
        check_access(actor, &request)?;
        Ok(request)
    }

    /// Display title of a request, e.g. `"Acme Trading - October 2026"`.
    pub async fn request_title(&self, request: &PayrollRequest) -> Result<String> {
        let company = self.load_company(&request.company_id).await?;
        Ok(request.title(&company.legal_name))
    }

    pub async fn save_company(&self, company: Company) -> Result<Company> {
        if company.legal_name.trim().is_empty() {
            return Err(PayrollError::validation("company legal name is required"));
        }
        self.storage.companies.save(company).await
    }

    /// Create or update an employee.
    ///
    /// Rounds the pay components to two places and recomputes gross and
    /// net pay, then checks that no component is negative, that the IBAN
    /// is a Saudi IBAN and that the employee code is unique within the
    /// company.
    pub async fn save_employee(&self, actor: &Actor, mut employee: Employee) -> Result<Employee> {
        if actor.role == Role::Employer {
            employee.company_id = employer_company(actor)?.to_string();
        }
        self.load_company(&employee.company_id).await?;

        employee.employee_code = employee.employee_code.trim().to_string();
        if employee.employee_code.is_empty() {
            return Err(PayrollError::validation("employee code is required"));
        }
        if employee.full_name.trim().is_empty() {
            return Err(PayrollError::validation("employee full name is required"));
        }
        employee.payroll_info.recompute();
        let info = &employee.payroll_info;
        for (field, amount) in [
            ("basic salary", info.basic_salary),
            ("allowances", info.allowances),
            ("deductions", info.deductions),
        ] {
            if amount < Decimal::ZERO {
                return Err(PayrollError::validation(format!(
                    "{field} of employee {} must not be negative",
                    employee.employee_code
                )));
            }
        }
        let iban = info.iban.as_deref().ok_or_else(|| {
            PayrollError::validation(format!(
                "IBAN of employee {} is required.",
                employee.employee_code
            ))
        })?;
        check_saudi_iban(iban).map_err(|msg| {
            PayrollError::validation(format!("employee {}: {msg}", employee.employee_code))
        })?;

        if let Some(existing) = self
            .storage
            .employees
            .find_by_code(&employee.company_id, &employee.employee_code)
            .await?
        {
            if existing.id != employee.id {
                return Err(PayrollError::validation(format!(
                    "Employee ID \"{}\" already exists in this company.",
                    employee.employee_code
                )));
            }
        }

        let created = employee.id.is_empty();
        let saved = self.storage.employees.save(employee).await?;
        if created {
            tracing::info!(
                employee_id = %saved.id,
                employee_code = %saved.employee_code,
                company_id = %saved.company_id,
                "Employee created"
            );
        }
        Ok(saved)
    }

    /// Validate the per-employee overrides of a request for `company_id`
    /// and calculate every rule.
    ///
    /// Entries for employees who do not exist or belong to another
    /// company are dropped with a warning; an invalid rule fails the
    /// whole call.
    async fn prepare_deductions(
        &self,
        company_id: &str,
        entries: Vec<EmployeeDeductions>,
    ) -> Result<Vec<EmployeeDeductions>> {
        if entries.len() > self.config.max_request_employees {
            return Err(PayrollError::validation(format!(
                "a payroll request may carry deductions for at most {} employees, got {}",
                self.config.max_request_employees,
                entries.len()
            )));
        }
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.employee_id.as_str()) {
                return Err(PayrollError::validation(format!(
                    "employee {} is listed more than once",
                    entry.employee_id
                )));
            }
        }

        let mut prepared = Vec::with_capacity(entries.len());
        for mut entry in entries {
            let employee = match self.storage.employees.get(&entry.employee_id).await? {
                Some(employee) if employee.company_id == company_id => employee,
                _ => {
                    tracing::warn!(
                        company_id,
                        employee_id = %entry.employee_id,
                        "Deductions given for an unknown employee, dropping them"
                    );
                    continue;
                }
            };
            apply_rules(&employee, &mut entry.deductions)?;
            prepared.push(entry);
        }
        Ok(prepared)
    }

    async fn summarize(
        &self,
        company_id: &str,
        deductions: &[EmployeeDeductions],
    ) -> Result<PayrollSummary> {
        aggregate(
            self.storage.employees.as_ref(),
            company_id,
            deductions,
            self.config.employee_query_cap,
        )
        .await
    }

    /// Submit a payroll request.  It starts in `new` with its totals
    /// computed from the company's active employees.
    pub async fn create_request(
        &self,
        actor: &Actor,
        new: NewPayrollRequest,
        now: DateTime<Utc>,
    ) -> Result<PayrollRequest> {
        let company_id = match actor.role {
            Role::Employer => employer_company(actor)?.to_string(),
            Role::SuperAdmin => new
                .company_id
                .ok_or_else(|| PayrollError::validation("company is required"))?,
        };
        self.load_company(&company_id).await?;

        let employee_deductions = self
            .prepare_deductions(&company_id, new.employee_deductions)
            .await?;
        let summary = self.summarize(&company_id, &employee_deductions).await?;

        let request = PayrollRequest {
            id: String::new(),
            company_id,
            payroll_period: month_start(new.payroll_period),
            employee_deductions,
            total_amount: summary.total_net_pay,
            summary,
            status: PayrollStatus::New,
            submitted_by: Some(actor.user_id.clone()),
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
            invoice_number: None,
            notes: new.notes,
            payslip_batch: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let saved = self.storage.requests.insert(request).await?;
        tracing::info!(
            request_id = %saved.id,
            company_id = %saved.company_id,
            period = %saved.payroll_period,
            employees = saved.summary.employees_count,
            total_amount = %saved.total_amount,
            "Payroll request created"
        );
        Ok(saved)
    }

    /// Edit a payroll request.  Changing the company or the deduction
    /// list recalculates every rule and the totals; both are only
    /// accepted while the request is `new`, `under_review` or
    /// `rejected`.
    pub async fn update_request(
        &self,
        actor: &Actor,
        id: &str,
        patch: PayrollRequestPatch,
        now: DateTime<Utc>,
    ) -> Result<PayrollRequest> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut request = self.load_request(id).await?;
        check_access(actor, &request)?;
        check_version(&request, patch.expected_version)?;
        if actor.role == Role::Employer
            && !matches!(request.status, PayrollStatus::New | PayrollStatus::Rejected)
        {
            return Err(PayrollError::Forbidden(format!(
                "employers may only edit payroll requests that are new or rejected, {} is {}",
                request.id, request.status
            )));
        }

        let company_changed = patch
            .company_id
            .as_ref()
            .is_some_and(|company| *company != request.company_id);
        let recalculate = company_changed || patch.employee_deductions.is_some();
        if recalculate && !request.status.is_editable() {
            return Err(PayrollError::validation(format!(
                "payroll request {} can no longer be edited in status {}",
                request.id, request.status
            )));
        }
        if company_changed && actor.role == Role::Employer {
            return Err(PayrollError::validation(
                "employers cannot move a payroll request to another company",
            ));
        }

        if let Some(company_id) = patch.company_id.filter(|_| company_changed) {
            self.load_company(&company_id).await?;
            request.company_id = company_id;
        }
        if let Some(notes) = patch.notes {
            request.notes = Some(notes);
        }
        if recalculate {
            let entries = patch
                .employee_deductions
                .unwrap_or_else(|| request.employee_deductions.clone());
            request.employee_deductions =
                self.prepare_deductions(&request.company_id, entries).await?;
            request.summary = self
                .summarize(&request.company_id, &request.employee_deductions)
                .await?;
            request.total_amount = request.summary.total_net_pay;
        }
        request.updated_at = now;

        let expected = request.version;
        let saved = self.storage.requests.update(request, expected).await?;
        tracing::debug!(request_id = %saved.id, version = saved.version, "Payroll request updated");
        Ok(saved)
    }

    /// Change the status of a payroll request and run the side effects
    /// of the change.
    ///
    /// Transitions of one request are serialised.  Saving a request
    /// with its current status changes nothing and in particular never
    /// generates payslips again.  Employers may move their own requests
    /// between `new`, `under_review` and back from `rejected`; review
    /// decisions are reserved to super admins.
    pub async fn transition(
        &self,
        actor: &Actor,
        id: &str,
        command: TransitionCommand,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut request = self.load_request(id).await?;
        check_access(actor, &request)?;
        check_version(&request, command.expected_version)?;
        if actor.role == Role::Employer && command.to.is_reviewed() {
            return Err(PayrollError::Forbidden(format!(
                "only super admins may move payroll request {} to {}",
                request.id, command.to
            )));
        }

        let plan = plan_transition(
            &request,
            &TransitionInput {
                to: command.to,
                actor,
                rejection_reason: command.rejection_reason.as_deref(),
                now,
            },
        )?;
        if plan.is_noop() {
            return Ok(TransitionOutcome {
                request,
                changed: false,
                payslips: None,
                delivery: None,
            });
        }

        apply_effects(&mut request, &plan);
        let expected = request.version;
        let mut request = self.storage.requests.update(request, expected).await?;
        tracing::info!(
            request_id = %request.id,
            from = %plan.from,
            to = %plan.to,
            reviewed_by = ?request.reviewed_by,
            "Payroll request status changed"
        );

        let mut payslips = None;
        let mut delivery = None;
        for effect in &plan.effects {
            match effect {
                Effect::GeneratePayslips => match self.run_payslip_batch(request.clone(), now).await {
                    Ok((updated, report)) => {
                        request = updated;
                        payslips = Some(report);
                    }
                    Err(err) => tracing::error!(
                        request_id = %request.id,
                        error = %err,
                        "Payslip batch did not run, left pending for reconciliation"
                    ),
                },
                Effect::NotifyCompany {
                    company_id,
                    title,
                    message,
                } => {
                    match self
                        .notify_company(company_id, title.clone(), message.clone(), actor, now)
                        .await
                    {
                        Ok(report) => delivery = Some(report),
                        Err(err) => tracing::error!(
                            request_id = %request.id,
                            company_id = %company_id,
                            error = %err,
                            "Failed to notify company about payroll status"
                        ),
                    }
                }
                Effect::StampReview { .. }
                | Effect::RecordRejection { .. }
                | Effect::AssignInvoiceNumber(_) => {}
            }
        }

        Ok(TransitionOutcome {
            request,
            changed: true,
            payslips,
            delivery,
        })
    }

    /// Generate the missing payslips of `request` and persist the batch
    /// outcome on it.  The caller holds the request lock.
    async fn run_payslip_batch(
        &self,
        mut request: PayrollRequest,
        now: DateTime<Utc>,
    ) -> Result<(PayrollRequest, GenerationReport)> {
        let report =
            payslip::generate(&self.storage, &request, self.config.employee_query_cap, now).await?;
        request.payslip_batch = Some(if report.is_complete() {
            PayslipBatch::Complete {
                generated: report.covered(),
            }
        } else {
            tracing::warn!(
                request_id = %request.id,
                covered = report.covered(),
                expected = report.employee_count,
                "Payslip batch incomplete"
            );
            PayslipBatch::Partial {
                generated: report.covered(),
                expected: report.employee_count,
            }
        });
        let expected = request.version;
        let request = self.storage.requests.update(request, expected).await?;
        Ok((request, report))
    }

    /// Resume every approved request whose payslip batch is pending or
    /// partial.  Only missing payslips are created.
    pub async fn reconcile_payslips(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, GenerationReport)>> {
        let mut results = Vec::new();
        for candidate in self.storage.requests.list_with_incomplete_batches().await? {
            let lock = self.lock_for(&candidate.id);
            let _guard = lock.lock().await;

            let request = match self.load_request(&candidate.id).await {
                Ok(request) => request,
                Err(err) => {
                    tracing::error!(
                        request_id = %candidate.id,
                        error = %err,
                        "Could not reload request for payslip reconciliation"
                    );
                    continue;
                }
            };
            let incomplete = request
                .payslip_batch
                .as_ref()
                .is_some_and(PayslipBatch::is_incomplete);
            if !incomplete || !request.status.has_payslips() {
                continue;
            }
            let id = request.id.clone();
            match self.run_payslip_batch(request, now).await {
                Ok((_, report)) => results.push((id, report)),
                Err(err) => tracing::error!(
                    request_id = %id,
                    error = %err,
                    "Payslip reconciliation failed"
                ),
            }
        }
        Ok(results)
    }

    pub async fn list_payslips(&self, request_id: &str) -> Result<Vec<Payslip>> {
        self.load_request(request_id).await?;
        self.storage.payslips.list_by_request(request_id).await
    }

    /// Move a payslip forward (sent, downloaded, viewed).
    pub async fn advance_payslip(
        &self,
        id: &str,
        to: PayslipStatus,
        now: DateTime<Utc>,
    ) -> Result<Payslip> {
        let mut payslip = self
            .storage
            .payslips
            .get(id)
            .await?
            .ok_or_else(|| PayrollError::not_found("payslip", id))?;
        let from = payslip.status;
        payslip.advance(to, now)?;
        if from == payslip.status {
            return Ok(payslip);
        }
        let saved = self.storage.payslips.update(payslip).await?;
        tracing::info!(payslip_id = %saved.id, from = %from, to = %saved.status, "Payslip status changed");
        Ok(saved)
    }

    /// Compose a draft notification.
    pub async fn create_notification(
        &self,
        actor: &Actor,
        title: LocalizedText,
        message: LocalizedText,
        target: RecipientTarget,
        now: DateTime<Utc>,
    ) -> Result<Notification> {
        if title.en.trim().is_empty() || title.ar.trim().is_empty() {
            return Err(PayrollError::validation(
                "notification title is required in both languages",
            ));
        }
        if message.en.trim().is_empty() || message.ar.trim().is_empty() {
            return Err(PayrollError::validation(
                "notification message is required in both languages",
            ));
        }
        if matches!(&target, RecipientTarget::Specific(ids) if ids.is_empty()) {
            return Err(PayrollError::validation(
                "a notification for specific companies needs at least one company",
            ));
        }
        let draft = notification::draft(title, message, target, Some(actor.user_id.clone()), now);
        self.storage.notifications.save(draft).await
    }

    pub async fn send_notification(&self, id: &str, now: DateTime<Utc>) -> Result<DeliveryReport> {
        notification::send(&self.storage, id, self.config.employee_query_cap, now).await
    }

    async fn notify_company(
        &self,
        company_id: &str,
        title: LocalizedText,
        message: LocalizedText,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<DeliveryReport> {
        let draft = notification::draft(
            title,
            message,
            RecipientTarget::Specific(vec![company_id.to_string()]),
            Some(actor.user_id.clone()),
            now,
        );
        let saved = self.storage.notifications.save(draft).await?;
        self.send_notification(&saved.id, now).await
    }

    /// Unread notifications of a company, newest first.  Employers always
    /// read their own company's feed.
    pub async fn unread_notifications(
        &self,
        actor: &Actor,
        company_id: Option<&str>,
    ) -> Result<UnreadFeed> {
        let company_id = match actor.role {
            Role::Employer => employer_company(actor)?,
            Role::SuperAdmin => {
                company_id.ok_or_else(|| PayrollError::validation("company is required"))?
            }
        };
        notification::unread_for_company(&self.storage, company_id).await
    }

    /// Mark a delivered notification as read by the acting user.
    /// Employers may only mark their own company's deliveries.
    pub async fn mark_notification_read(
        &self,
        actor: &Actor,
        recipient_id: &str,
        now: DateTime<Utc>,
    ) -> Result<NotificationRecipient> {
        let mut recipient = self
            .storage
            .notifications
            .get_recipient(recipient_id)
            .await?
            .ok_or_else(|| PayrollError::not_found("notification recipient", recipient_id))?;
        if actor.role == Role::Employer && employer_company(actor)? != recipient.company_id {
            return Err(PayrollError::not_found("notification recipient", recipient_id));
        }
        if !recipient.mark_read(&actor.user_id, now) {
            return Ok(recipient);
        }
        let saved = self.storage.notifications.update_recipient(recipient).await?;
        tracing::info!(
            recipient_id = %saved.id,
            company_id = %saved.company_id,
            user_id = %actor.user_id,
            "Notification marked as read"
        );
        Ok(saved)
    }
}

fn employer_company(actor: &Actor) -> Result<&str> {
    actor
        .company_id
        .as_deref()
        .ok_or_else(|| PayrollError::validation("employer account is not linked to a company"))
}

/// Employers only reach their own company's requests; anything else
/// looks like a missing request to them.
fn check_access(actor: &Actor, request: &PayrollRequest) -> Result<()> {
    if actor.role == Role::Employer && employer_company(actor)? != request.company_id {
        return Err(PayrollError::not_found("payroll request", request.id.clone()));
    }
    Ok(())
}

fn check_version(request: &PayrollRequest, expected: Option<u64>) -> Result<()> {
    match expected {
        Some(version) if version != request.version => Err(PayrollError::Conflict(format!(
            "payroll request {} is at version {}, expected {}",
            request.id, request.version, version
        ))),
        _ => Ok(()),
    }
}
