//! Notification composition and fan-out.
//!
//! A [`Notification`] is composed once in English and Arabic and then
//! sent to either every active company or an explicit list.  Sending
//! creates one [`NotificationRecipient`] per company, concurrently and
//! with per-company failure isolation.

use crate::error::{PayrollError, Result};
use crate::models::{
    month_label, DeliveryStatus, LocalizedText, Notification, NotificationRecipient,
    NotificationStatus, PayrollRequest, PayrollStatus, ReadReceipt, RecipientTarget,
};
use crate::store::Storage;
use chrono::{DateTime, Utc};
use futures::future::join_all;

/// Outcome of a fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    pub total: usize,
}

/// Bilingual title and message telling a company about a payroll
/// request status change.
pub fn compose_status_notice(
    request: &PayrollRequest,
    status: PayrollStatus,
) -> (LocalizedText, LocalizedText) {
    let period = month_label(request.payroll_period);
    let (en_state, ar_state) = match status {
        PayrollStatus::New => ("reopened", "أعيد فتحه"),
        PayrollStatus::UnderReview => ("under review", "قيد المراجعة"),
        PayrollStatus::Approved => ("approved", "تمت الموافقة عليه"),
        PayrollStatus::Rejected => ("rejected", "تم رفضه"),
        PayrollStatus::InvoiceGenerated => ("invoiced", "تم إصدار فاتورته"),
        PayrollStatus::Processed => ("processed", "تمت معالجته"),
    };
    let title = LocalizedText {
        en: format!("Payroll request {en_state}"),
        ar: format!("طلب الرواتب {ar_state}"),
    };
    let mut en = format!("Your payroll request for {period} has been {en_state}.");
    let mut ar = format!("طلب الرواتب الخاص بكم لفترة {period} {ar_state}.");
    match status {
        PayrollStatus::Rejected => {
            if let Some(reason) = &request.rejection_reason {
                en.push_str(&format!(" Reason: {reason}"));
                ar.push_str(&format!(" السبب: {reason}"));
            }
        }
        PayrollStatus::InvoiceGenerated => {
            if let Some(number) = &request.invoice_number {
                en.push_str(&format!(" Invoice: {number}"));
                ar.push_str(&format!(" الفاتورة: {number}"));
            }
        }
        _ => {}
    }
    (title, LocalizedText { en, ar })
}

/// A new draft notification.
pub fn draft(
    title: LocalizedText,
    message: LocalizedText,
    target: RecipientTarget,
    sent_by: Option<String>,
    now: DateTime<Utc>,
) -> Notification {
    Notification {
        id: String::new(),
        title,
        message,
        target,
        sent_by,
        status: NotificationStatus::Draft,
        sent_at: None,
        created_at: now,
    }
}

/// Resolve the companies a notification goes to.  Unknown companies in
/// an explicit list are skipped.
async fn resolve_targets(
    storage: &Storage,
    notification: &Notification,
    cap: usize,
) -> Result<Vec<String>> {
    match &notification.target {
        RecipientTarget::All => Ok(storage
            .companies
            .find_active(cap)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect()),
        RecipientTarget::Specific(ids) => {
            let mut found = Vec::with_capacity(ids.len());
            for id in ids {
                if found.contains(id) {
                    continue;
                }
                match storage.companies.get(id).await? {
                    Some(company) => found.push(company.id),
                    None => tracing::warn!(
                        notification_id = %notification.id,
                        company_id = %id,
                        "Notification target company not found, skipping"
                    ),
                }
            }
            Ok(found)
        }
    }
}

async fn deliver(
    storage: &Storage,
    notification_id: &str,
    company_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    if storage
        .notifications
        .find_recipient(notification_id, company_id)
        .await?
        .is_some()
    {
        return Ok(());
    }
    let inserted = storage
        .notifications
        .insert_recipient(NotificationRecipient {
            id: String::new(),
            notification_id: notification_id.to_string(),
            company_id: company_id.to_string(),
            is_read: false,
            delivered_at: now,
            read_at: None,
            delivery_status: DeliveryStatus::Delivered,
            read_by: Vec::new(),
        })
        .await;
    match inserted {
        Ok(_) => Ok(()),
        // Another send reached this company first.
        Err(PayrollError::Conflict(_)) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Send a draft (or previously failed) notification.
///
/// Recipients are created concurrently; a failure for one company is
/// logged and counted without affecting the others.  The notification
/// ends `failed` only when there were targets and none was reached.
pub async fn send(
    storage: &Storage,
    notification_id: &str,
    cap: usize,
    now: DateTime<Utc>,
) -> Result<DeliveryReport> {
    let mut notification = storage
        .notifications
        .get(notification_id)
        .await?
        .ok_or_else(|| PayrollError::not_found("notification", notification_id))?;
    if notification.status == NotificationStatus::Sent {
        return Err(PayrollError::validation(format!(
            "notification {notification_id} has already been sent"
        )));
    }

    let targets = resolve_targets(storage, &notification, cap).await?;
    let outcomes = join_all(
        targets
            .iter()
            .map(|company_id| deliver(storage, notification_id, company_id, now)),
    )
    .await;

    let mut report = DeliveryReport {
        delivered: 0,
        failed: 0,
        total: targets.len(),
    };
    for (company_id, outcome) in targets.iter().zip(outcomes) {
        match outcome {
            Ok(()) => report.delivered += 1,
            Err(err) => {
                report.failed += 1;
                tracing::error!(
                    notification_id,
                    company_id = %company_id,
                    error = %err,
                    "Failed to deliver notification"
                );
            }
        }
    }

    notification.sent_at.get_or_insert(now);
    notification.status = if report.delivered == 0 && report.total > 0 {
        NotificationStatus::Failed
    } else {
        NotificationStatus::Sent
    };
    storage.notifications.save(notification).await?;

    tracing::info!(
        notification_id,
        delivered = report.delivered,
        total = report.total,
        "Notification delivered"
    );
    Ok(report)
}

/// A company's unread deliveries, newest first.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UnreadFeed {
    pub notifications: Vec<UnreadNotification>,
    pub unread_count: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct UnreadNotification {
    #[serde(flatten)]
    pub recipient: NotificationRecipient,
    pub notification: Notification,
}

/// Unread deliveries to `company_id`, each with its notification.
pub async fn unread_for_company(storage: &Storage, company_id: &str) -> Result<UnreadFeed> {
    let recipients = storage
        .notifications
        .list_unread_for_company(company_id)
        .await?;
    let mut notifications = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        match storage.notifications.get(&recipient.notification_id).await? {
            Some(notification) => notifications.push(UnreadNotification {
                recipient,
                notification,
            }),
            None => tracing::warn!(
                recipient_id = %recipient.id,
                notification_id = %recipient.notification_id,
                "Delivery refers to a missing notification, skipping"
            ),
        }
    }
    Ok(UnreadFeed {
        unread_count: notifications.len(),
        notifications,
    })
}

impl NotificationRecipient {
    /// Record that `user_id` read the notification.  Returns whether
    /// anything changed; a user is listed in `read_by` at most once.
    pub fn mark_read(&mut self, user_id: &str, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        if !self.is_read {
            self.is_read = true;
            self.read_at = Some(now);
            changed = true;
        }
        if !self.read_by.iter().any(|r| r.user_id == user_id) {
            self.read_by.push(ReadReceipt {
                user_id: user_id.to_string(),
                read_at: now,
            });
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Company, CompanyStatus};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
    }

    fn text(s: &str) -> LocalizedText {
        LocalizedText {
            en: s.to_string(),
            ar: s.to_string(),
        }
    }

    async fn company(storage: &Storage, id: &str, status: CompanyStatus) {
        storage
            .companies
            .save(Company {
                id: id.into(),
                legal_name: format!("Company {id}"),
                status,
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_mark_read_is_idempotent_per_user() {
        let mut recipient = NotificationRecipient {
            id: "r1".into(),
            notification_id: "n1".into(),
            company_id: "c1".into(),
            is_read: false,
            delivered_at: now(),
            read_at: None,
            delivery_status: DeliveryStatus::Delivered,
            read_by: vec![],
        };
        assert!(recipient.mark_read("u1", now()));
        assert!(!recipient.mark_read("u1", now() + chrono::Duration::minutes(5)));
        assert_eq!(recipient.read_by.len(), 1);
        assert_eq!(recipient.read_at, Some(now()));

        assert!(recipient.mark_read("u2", now()));
        assert_eq!(recipient.read_by.len(), 2);
    }

    #[tokio::test]
    async fn test_send_to_all_active_companies() {
        let storage = Storage::in_memory();
        company(&storage, "c1", CompanyStatus::Active).await;
        company(&storage, "c2", CompanyStatus::Active).await;
        company(&storage, "c3", CompanyStatus::Inactive).await;
        let saved = storage
            .notifications
            .save(draft(text("Hi"), text("Body"), RecipientTarget::All, None, now()))
            .await
            .unwrap();

        let report = send(&storage, &saved.id, 1000, now()).await.unwrap();
        assert_eq!(report, DeliveryReport { delivered: 2, failed: 0, total: 2 });
        let stored = storage.notifications.get(&saved.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Sent);
        assert_eq!(stored.sent_at, Some(now()));
        assert_eq!(storage.notifications.list_recipients(&saved.id).await.unwrap().len(), 2);

        // A sent notification is not sent twice.
        assert!(send(&storage, &saved.id, 1000, now()).await.is_err());
    }

    #[tokio::test]
    async fn test_specific_targets_skip_unknown_companies() {
        let storage = Storage::in_memory();
        company(&storage, "c1", CompanyStatus::Active).await;
        let saved = storage
            .notifications
            .save(draft(
                text("Hi"),
                text("Body"),
                RecipientTarget::Specific(vec!["c1".into(), "missing".into(), "c1".into()]),
                Some("admin-1".into()),
                now(),
            ))
            .await
            .unwrap();
        let report = send(&storage, &saved.id, 1000, now()).await.unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn test_no_targets_is_not_a_failure() {
        let storage = Storage::in_memory();
        let saved = storage
            .notifications
            .save(draft(text("Hi"), text("Body"), RecipientTarget::All, None, now()))
            .await
            .unwrap();
        let report = send(&storage, &saved.id, 1000, now()).await.unwrap();
        assert_eq!(report.total, 0);
        let stored = storage.notifications.get(&saved.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn test_unread_feed_is_newest_first() {
        let storage = Storage::in_memory();
        company(&storage, "c1", CompanyStatus::Active).await;
        company(&storage, "c2", CompanyStatus::Active).await;
        let later = now() + chrono::Duration::hours(2);
        let mut ids = Vec::new();
        for (title, at) in [("Older", now()), ("Newer", later)] {
            let saved = storage
                .notifications
                .save(draft(text(title), text("Body"), RecipientTarget::All, None, at))
                .await
                .unwrap();
            send(&storage, &saved.id, 1000, at).await.unwrap();
            ids.push(saved.id);
        }

        let feed = unread_for_company(&storage, "c1").await.unwrap();
        assert_eq!(feed.unread_count, 2);
        assert_eq!(feed.notifications[0].notification.title.en, "Newer");
        assert_eq!(feed.notifications[1].notification.title.en, "Older");

        let mut newest = feed.notifications[0].recipient.clone();
        assert!(newest.mark_read("u1", later));
        storage.notifications.update_recipient(newest).await.unwrap();
        let feed = unread_for_company(&storage, "c1").await.unwrap();
        assert_eq!(feed.unread_count, 1);
        assert_eq!(feed.notifications[0].notification.id, ids[0]);
        assert_eq!(unread_for_company(&storage, "c2").await.unwrap().unread_count, 2);
    }
}
