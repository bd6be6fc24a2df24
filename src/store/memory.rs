//! In-process implementation of every store trait.
//!
//! Records live in insertion-ordered vectors behind `parking_lot`
//! locks.  Used by the binary and by the tests.

use super::{CompanyStore, EmployeeStore, NotificationStore, PayrollRequestStore, PayslipStore};
use crate::error::{PayrollError, Result};
use crate::models::{
    Company, CompanyStatus, Employee, EmployeeStatus, Notification, NotificationRecipient,
    PayrollRequest, Payslip,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    companies: Vec<Company>,
    employees: Vec<Employee>,
    requests: Vec<PayrollRequest>,
    payslips: Vec<Payslip>,
    notifications: Vec<Notification>,
    recipients: Vec<NotificationRecipient>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

fn ensure_id(id: &mut String) {
    if id.is_empty() {
        *id = Uuid::new_v4().to_string();
    }
}

fn upsert<T, F>(rows: &mut Vec<T>, row: T, same: F)
where
    F: Fn(&T) -> bool,
{
    match rows.iter_mut().find(|existing| same(existing)) {
        Some(slot) => *slot = row,
        None => rows.push(row),
    }
}

/// One payroll request per company and period.
fn check_period_free(requests: &[PayrollRequest], request: &PayrollRequest) -> Result<()> {
    let taken = requests.iter().find(|r| {
        r.id != request.id
            && r.company_id == request.company_id
            && r.payroll_period == request.payroll_period
    });
    match taken {
        Some(existing) => Err(PayrollError::Conflict(format!(
            "company {} already has payroll request {} for {}",
            request.company_id, existing.id, request.payroll_period
        ))),
        None => Ok(()),
    }
}

#[async_trait]
impl CompanyStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Company>> {
        let tables = self.tables.read();
        Ok(tables.companies.iter().find(|c| c.id == id).cloned())
    }

    async fn save(&self, mut company: Company) -> Result<Company> {
        ensure_id(&mut company.id);
        let mut tables = self.tables.write();
        let id = company.id.clone();
        upsert(&mut tables.companies, company.clone(), |c| c.id == id);
        Ok(company)
    }

    async fn find_active(&self, limit: usize) -> Result<Vec<Company>> {
        let tables = self.tables.read();
        Ok(tables
            .companies
            .iter()
            .filter(|c| c.status == CompanyStatus::Active)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EmployeeStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Employee>> {
        let tables = self.tables.read();
        Ok(tables.employees.iter().find(|e| e.id == id).cloned())
    }

    async fn find_by_code(
        &self,
        company_id: &str,
        employee_code: &str,
    ) -> Result<Option<Employee>> {
        let tables = self.tables.read();
        Ok(tables
            .employees
            .iter()
            .find(|e| e.company_id == company_id && e.employee_code == employee_code)
            .cloned())
    }

    async fn find_active_by_company(
        &self,
        company_id: &str,
        limit: usize,
    ) -> Result<Vec<Employee>> {
        let tables = self.tables.read();
        Ok(tables
            .employees
            .iter()
            .filter(|e| e.company_id == company_id && e.status == EmployeeStatus::Active)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn save(&self, mut employee: Employee) -> Result<Employee> {
        ensure_id(&mut employee.id);
        let mut tables = self.tables.write();
        let id = employee.id.clone();
        upsert(&mut tables.employees, employee.clone(), |e| e.id == id);
        Ok(employee)
    }
}

#[async_trait]
impl PayrollRequestStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<PayrollRequest>> {
        let tables = self.tables.read();
        Ok(tables.requests.iter().find(|r| r.id == id).cloned())
    }

    async fn insert(&self, mut request: PayrollRequest) -> Result<PayrollRequest> {
        ensure_id(&mut request.id);
        let mut tables = self.tables.write();
        if tables.requests.iter().any(|r| r.id == request.id) {
            return Err(PayrollError::Conflict(format!(
                "payroll request {} already exists",
                request.id
            )));
        }
        check_period_free(&tables.requests, &request)?;
        tables.requests.push(request.clone());
        Ok(request)
    }

    async fn update(
        &self,
        mut request: PayrollRequest,
        expected_version: u64,
    ) -> Result<PayrollRequest> {
        let mut tables = self.tables.write();
        check_period_free(&tables.requests, &request)?;
        let slot = tables
            .requests
            .iter_mut()
            .find(|r| r.id == request.id)
            .ok_or_else(|| PayrollError::not_found("payroll request", request.id.clone()))?;
        if slot.version != expected_version {
            return Err(PayrollError::Conflict(format!(
                "payroll request {} is at version {}, expected {}",
                request.id, slot.version, expected_version
            )));
        }
        request.version = expected_version + 1;
        *slot = request.clone();
        Ok(request)
    }

    async fn list_with_incomplete_batches(&self) -> Result<Vec<PayrollRequest>> {
        let tables = self.tables.read();
        Ok(tables
            .requests
            .iter()
            .filter(|r| r.payslip_batch.as_ref().is_some_and(|b| b.is_incomplete()))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PayslipStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Payslip>> {
        let tables = self.tables.read();
        Ok(tables.payslips.iter().find(|p| p.id == id).cloned())
    }

    async fn find_by_request_and_employee(
        &self,
        request_id: &str,
        employee_id: &str,
    ) -> Result<Option<Payslip>> {
        let tables = self.tables.read();
        Ok(tables
            .payslips
            .iter()
            .find(|p| p.payroll_request_id == request_id && p.employee_id == employee_id)
            .cloned())
    }

    async fn insert(&self, mut payslip: Payslip) -> Result<Payslip> {
        ensure_id(&mut payslip.id);
        let mut tables = self.tables.write();
        if tables.payslips.iter().any(|p| {
            p.payroll_request_id == payslip.payroll_request_id
                && p.employee_id == payslip.employee_id
        }) {
            return Err(PayrollError::Conflict(format!(
                "payslip for employee {} on request {} already exists",
                payslip.employee_id, payslip.payroll_request_id
            )));
        }
        tables.payslips.push(payslip.clone());
        Ok(payslip)
    }

    async fn update(&self, payslip: Payslip) -> Result<Payslip> {
        let mut tables = self.tables.write();
        let slot = tables
            .payslips
            .iter_mut()
            .find(|p| p.id == payslip.id)
            .ok_or_else(|| PayrollError::not_found("payslip", payslip.id.clone()))?;
        *slot = payslip.clone();
        Ok(payslip)
    }

    async fn list_by_request(&self, request_id: &str) -> Result<Vec<Payslip>> {
        let tables = self.tables.read();
        Ok(tables
            .payslips
            .iter()
            .filter(|p| p.payroll_request_id == request_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Notification>> {
        let tables = self.tables.read();
        Ok(tables.notifications.iter().find(|n| n.id == id).cloned())
    }

    async fn save(&self, mut notification: Notification) -> Result<Notification> {
        ensure_id(&mut notification.id);
        let mut tables = self.tables.write();
        let id = notification.id.clone();
        upsert(&mut tables.notifications, notification.clone(), |n| n.id == id);
        Ok(notification)
    }

    async fn get_recipient(&self, id: &str) -> Result<Option<NotificationRecipient>> {
        let tables = self.tables.read();
        Ok(tables.recipients.iter().find(|r| r.id == id).cloned())
    }

    async fn find_recipient(
        &self,
        notification_id: &str,
        company_id: &str,
    ) -> Result<Option<NotificationRecipient>> {
        let tables = self.tables.read();
        Ok(tables
            .recipients
            .iter()
            .find(|r| r.notification_id == notification_id && r.company_id == company_id)
            .cloned())
    }

    async fn insert_recipient(
        &self,
        mut recipient: NotificationRecipient,
    ) -> Result<NotificationRecipient> {
        ensure_id(&mut recipient.id);
        let mut tables = self.tables.write();
        if tables.recipients.iter().any(|r| {
            r.notification_id == recipient.notification_id && r.company_id == recipient.company_id
        }) {
            return Err(PayrollError::Conflict(format!(
                "notification {} already delivered to company {}",
                recipient.notification_id, recipient.company_id
            )));
        }
        tables.recipients.push(recipient.clone());
        Ok(recipient)
    }

    async fn update_recipient(
        &self,
        recipient: NotificationRecipient,
    ) -> Result<NotificationRecipient> {
        let mut tables = self.tables.write();
        let slot = tables
            .recipients
            .iter_mut()
            .find(|r| r.id == recipient.id)
            .ok_or_else(|| PayrollError::not_found("notification recipient", recipient.id.clone()))?;
        *slot = recipient.clone();
        Ok(recipient)
    }

    async fn list_recipients(&self, notification_id: &str) -> Result<Vec<NotificationRecipient>> {
        let tables = self.tables.read();
        Ok(tables
            .recipients
            .iter()
            .filter(|r| r.notification_id == notification_id)
            .cloned()
            .collect())
    }

    async fn list_unread_for_company(
        &self,
        company_id: &str,
    ) -> Result<Vec<NotificationRecipient>> {
        let tables = self.tables.read();
        let mut unread: Vec<NotificationRecipient> = tables
            .recipients
            .iter()
            .filter(|r| r.company_id == company_id && !r.is_read)
            .cloned()
            .collect();
        unread.sort_by(|a, b| b.delivered_at.cmp(&a.delivered_at));
        Ok(unread)
    }
}
