#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use payroll_engine::config::EngineConfig;
use payroll_engine::error::{PayrollError, Result};
use payroll_engine::models::{
    Actor, Company, CompanyStatus, DeductionKind, DeductionRule, Employee, EmployeeDeductions,
    EmployeeStatus, Notification, NotificationRecipient, PayrollInfo, PayrollRequest, Payslip,
};
use payroll_engine::service::{NewPayrollRequest, PayrollService};
use payroll_engine::store::memory::MemoryStore;
use payroll_engine::store::{NotificationStore, PayrollRequestStore, PayslipStore, Storage};

pub const COMPANY_ID: &str = "co-acme-0042";

/// A well-formed Saudi IBAN, written the way people type it.
pub const IBAN: &str = "sa03 8000 0000 6080 1016 7519";

pub fn admin() -> Actor {
    Actor::admin("admin-1")
}

/// 2026-10-`day` at `hour`:00 UTC.
pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, day, hour, 0, 0).unwrap()
}

pub fn october() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
}

pub fn service_with(storage: Storage) -> PayrollService {
    PayrollService::new(storage, EngineConfig::default())
}

pub fn service() -> PayrollService {
    service_with(Storage::in_memory())
}

pub async fn seed_company(service: &PayrollService, id: &str, status: CompanyStatus) -> Company {
    service
        .save_company(Company {
            id: id.to_string(),
            legal_name: "Acme Trading".to_string(),
            status,
        })
        .await
        .unwrap()
}

pub async fn seed_employee(
    service: &PayrollService,
    code: &str,
    basic: Decimal,
    allowances: Decimal,
    deductions: Decimal,
) -> Employee {
    service
        .save_employee(
            &admin(),
            Employee {
                id: String::new(),
                company_id: COMPANY_ID.to_string(),
                employee_code: code.to_string(),
                full_name: format!("Employee {code}"),
                status: EmployeeStatus::Active,
                payroll_info: PayrollInfo {
                    basic_salary: basic,
                    allowances,
                    deductions,
                    iban: Some(IBAN.to_string()),
                    ..Default::default()
                },
            },
        )
        .await
        .unwrap()
}

pub fn fixed(employee_id: &str, amount: Decimal, reason: &str) -> EmployeeDeductions {
    EmployeeDeductions {
        employee_id: employee_id.to_string(),
        deductions: vec![DeductionRule::new(DeductionKind::Fixed {
            fixed_amount: amount,
            reason: Some(reason.to_string()),
        })],
    }
}

pub fn new_request(deductions: Vec<EmployeeDeductions>) -> NewPayrollRequest {
    NewPayrollRequest {
        company_id: Some(COMPANY_ID.to_string()),
        payroll_period: october(),
        employee_deductions: deductions,
        notes: None,
    }
}

/// Payslip store that fails inserts for chosen employees.
pub struct FlakyPayslips {
    pub inner: Arc<MemoryStore>,
    pub failing: Mutex<HashSet<String>>,
}

#[async_trait]
impl PayslipStore for FlakyPayslips {
    async fn get(&self, id: &str) -> Result<Option<Payslip>> {
        PayslipStore::get(self.inner.as_ref(), id).await
    }

    async fn find_by_request_and_employee(
        &self,
        request_id: &str,
        employee_id: &str,
    ) -> Result<Option<Payslip>> {
        self.inner
            .find_by_request_and_employee(request_id, employee_id)
            .await
    }

    async fn insert(&self, payslip: Payslip) -> Result<Payslip> {
        if self.failing.lock().contains(&payslip.employee_id) {
            return Err(PayrollError::Storage("payslip table unavailable".into()));
        }
        PayslipStore::insert(self.inner.as_ref(), payslip).await
    }

    async fn update(&self, payslip: Payslip) -> Result<Payslip> {
        PayslipStore::update(self.inner.as_ref(), payslip).await
    }

    async fn list_by_request(&self, request_id: &str) -> Result<Vec<Payslip>> {
        self.inner.list_by_request(request_id).await
    }
}

/// Notification store whose recipient inserts always fail.
pub struct UnreachableRecipients {
    pub inner: Arc<MemoryStore>,
}

#[async_trait]
impl NotificationStore for UnreachableRecipients {
    async fn get(&self, id: &str) -> Result<Option<Notification>> {
        NotificationStore::get(self.inner.as_ref(), id).await
    }

    async fn save(&self, notification: Notification) -> Result<Notification> {
        NotificationStore::save(self.inner.as_ref(), notification).await
    }

    async fn get_recipient(&self, id: &str) -> Result<Option<NotificationRecipient>> {
        self.inner.get_recipient(id).await
    }

    async fn find_recipient(
        &self,
        notification_id: &str,
        company_id: &str,
    ) -> Result<Option<NotificationRecipient>> {
        self.inner.find_recipient(notification_id, company_id).await
    }

    async fn insert_recipient(
        &self,
        _recipient: NotificationRecipient,
    ) -> Result<NotificationRecipient> {
        Err(PayrollError::Storage("delivery transport down".into()))
    }

    async fn update_recipient(
        &self,
        recipient: NotificationRecipient,
    ) -> Result<NotificationRecipient> {
        self.inner.update_recipient(recipient).await
    }

    async fn list_recipients(&self, notification_id: &str) -> Result<Vec<NotificationRecipient>> {
        self.inner.list_recipients(notification_id).await
    }

    async fn list_unread_for_company(
        &self,
        company_id: &str,
    ) -> Result<Vec<NotificationRecipient>> {
        self.inner.list_unread_for_company(company_id).await
    }
}

/// Notification store whose recipient lookups never see existing
/// deliveries, as when two sends race.
pub struct RacingRecipients {
    pub inner: Arc<MemoryStore>,
}

#[async_trait]
impl NotificationStore for RacingRecipients {
    async fn get(&self, id: &str) -> Result<Option<Notification>> {
        NotificationStore::get(self.inner.as_ref(), id).await
    }

    async fn save(&self, notification: Notification) -> Result<Notification> {
        NotificationStore::save(self.inner.as_ref(), notification).await
    }

    async fn get_recipient(&self, id: &str) -> Result<Option<NotificationRecipient>> {
        self.inner.get_recipient(id).await
    }

    async fn find_recipient(
        &self,
        _notification_id: &str,
        _company_id: &str,
    ) -> Result<Option<NotificationRecipient>> {
        Ok(None)
    }

    async fn insert_recipient(
        &self,
        recipient: NotificationRecipient,
    ) -> Result<NotificationRecipient> {
        self.inner.insert_recipient(recipient).await
    }

    async fn update_recipient(
        &self,
        recipient: NotificationRecipient,
    ) -> Result<NotificationRecipient> {
        self.inner.update_recipient(recipient).await
    }

    async fn list_recipients(&self, notification_id: &str) -> Result<Vec<NotificationRecipient>> {
        self.inner.list_recipients(notification_id).await
    }

    async fn list_unread_for_company(
        &self,
        company_id: &str,
    ) -> Result<Vec<NotificationRecipient>> {
        self.inner.list_unread_for_company(company_id).await
    }
}

/// Request store that loses chosen requests on lookup.
pub struct VanishingRequests {
    pub inner: Arc<MemoryStore>,
    pub missing: Mutex<HashSet<String>>,
}

#[async_trait]
impl PayrollRequestStore for VanishingRequests {
    async fn get(&self, id: &str) -> Result<Option<PayrollRequest>> {
        if self.missing.lock().contains(id) {
            return Err(PayrollError::Storage(format!("request {id} unreadable")));
        }
        PayrollRequestStore::get(self.inner.as_ref(), id).await
    }

    async fn insert(&self, request: PayrollRequest) -> Result<PayrollRequest> {
        PayrollRequestStore::insert(self.inner.as_ref(), request).await
    }

    async fn update(&self, request: PayrollRequest, expected_version: u64) -> Result<PayrollRequest> {
        PayrollRequestStore::update(self.inner.as_ref(), request, expected_version).await
    }

    async fn list_with_incomplete_batches(&self) -> Result<Vec<PayrollRequest>> {
        self.inner.list_with_incomplete_batches().await
    }
}
