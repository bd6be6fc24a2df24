//! Payroll request lifecycle.
//!
//! ```text
//! new ──► under_review ──► approved ──► invoice_generated ──► processed
//!  │            │
//!  │            └────────► rejected ──► new | under_review
//!  └──► approved | rejected
//! ```
//!
//! [`plan_transition`] is pure: it validates a requested status change
//! and returns the side effects the change implies as a list of
//! [`Effect`] commands.  [`apply_effects`] performs the record-stamping
//! commands on the request; the orchestrator in
//! [`crate::service`] executes the rest (payslip generation, company
//! notification).

use crate::error::{PayrollError, Result};
use crate::models::{Actor, LocalizedText, PayrollRequest, PayrollStatus, PayslipBatch};
use crate::notification::compose_status_notice;
use chrono::{DateTime, Utc};

/// A side effect of a status transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Record who reviewed the request and when.  Overwrites earlier
    /// values.
    StampReview { by: String, at: DateTime<Utc> },
    RecordRejection { reason: String },
    /// Freeze the request's invoice number.
    AssignInvoiceNumber(String),
    /// Start the payslip batch for an approval.
    GeneratePayslips,
    /// Tell the request's company about the new status.
    NotifyCompany {
        company_id: String,
        title: LocalizedText,
        message: LocalizedText,
    },
}

/// A validated status change and its side effects.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: PayrollStatus,
    pub to: PayrollStatus,
    pub at: DateTime<Utc>,
    pub effects: Vec<Effect>,
}

impl Transition {
    /// A save that leaves the status unchanged.
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }

    pub fn generates_payslips(&self) -> bool {
        self.effects.contains(&Effect::GeneratePayslips)
    }
}

/// What the caller asks for.
#[derive(Debug, Clone)]
pub struct TransitionInput<'a> {
    pub to: PayrollStatus,
    pub actor: &'a Actor,
    pub rejection_reason: Option<&'a str>,
    pub now: DateTime<Utc>,
}

/// Whether the lifecycle has an edge from `from` to `to`.
pub fn can_transition(from: PayrollStatus, to: PayrollStatus) -> bool {
    use PayrollStatus::*;
    matches!(
        (from, to),
        (New, UnderReview)
            | (New, Approved)
            | (New, Rejected)
            | (UnderReview, Approved)
            | (UnderReview, Rejected)
            | (Rejected, New)
            | (Rejected, UnderReview)
            | (Approved, InvoiceGenerated)
            | (InvoiceGenerated, Processed)
    )
}

/// Invoice number for a request of `company_id` issued at `now`:
/// `INV-<last four characters of the company id>-<unix millis>`.
pub fn invoice_number(company_id: &str, now: DateTime<Utc>) -> String {
    let chars: Vec<char> = company_id.chars().collect();
    let suffix: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("INV-{}-{}", suffix, now.timestamp_millis())
}

/// Validate a status change and list its side effects.
pub fn plan_transition(request: &PayrollRequest, input: &TransitionInput<'_>) -> Result<Transition> {
    let from = request.status;
    let to = input.to;
    let mut effects = Vec::new();

    if from == to {
        return Ok(Transition {
            from,
            to,
            at: input.now,
            effects,
        });
    }
    if !can_transition(from, to) {
        return Err(PayrollError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    if to == PayrollStatus::Rejected {
        let reason = input
            .rejection_reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                PayrollError::validation("a rejection reason is required to reject a payroll request")
            })?;
        effects.push(Effect::RecordRejection {
            reason: reason.to_string(),
        });
    }

    if to.is_reviewed() {
        effects.push(Effect::StampReview {
            by: input.actor.user_id.clone(),
            at: input.now,
        });
    }

    if to == PayrollStatus::Approved {
        effects.push(Effect::GeneratePayslips);
    }

    if to == PayrollStatus::InvoiceGenerated && request.invoice_number.is_none() {
        effects.push(Effect::AssignInvoiceNumber(invoice_number(
            &request.company_id,
            input.now,
        )));
    }

    if to.is_reviewed() {
        let mut preview = request.clone();
        for effect in &effects {
            match effect {
                Effect::RecordRejection { reason } => preview.rejection_reason = Some(reason.clone()),
                Effect::AssignInvoiceNumber(number) => preview.invoice_number = Some(number.clone()),
                _ => {}
            }
        }
        let (title, message) = compose_status_notice(&preview, to);
        effects.push(Effect::NotifyCompany {
            company_id: request.company_id.clone(),
            title,
            message,
        });
    }

    Ok(Transition {
        from,
        to,
        at: input.now,
        effects,
    })
}

/// Apply a planned transition to the request record.  Effects that
/// need other stores are left to the caller.
pub fn apply_effects(request: &mut PayrollRequest, transition: &Transition) {
    if transition.is_noop() {
        return;
    }
    request.status = transition.to;
    request.updated_at = transition.at;
    for effect in &transition.effects {
        match effect {
            Effect::StampReview { by, at } => {
                request.reviewed_by = Some(by.clone());
                request.reviewed_at = Some(*at);
            }
            Effect::RecordRejection { reason } => {
                request.rejection_reason = Some(reason.clone());
            }
            Effect::AssignInvoiceNumber(number) => {
                if request.invoice_number.is_none() {
                    request.invoice_number = Some(number.clone());
                }
            }
            Effect::GeneratePayslips => {
                request.payslip_batch = Some(PayslipBatch::Pending);
            }
            Effect::NotifyCompany { .. } => {}
        }
    }
}
