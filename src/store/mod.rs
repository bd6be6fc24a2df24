//! Storage collaborators.
//!
//! The engine never talks to a database directly.  Each record type is
//! reached through an async store trait; [`Storage`] bundles one handle
//! per trait so components can be wired against any backend.
//! [`memory::MemoryStore`] implements every trait in process.

pub mod memory;

use crate::error::Result;
use crate::models::{
    Company, Employee, Notification, NotificationRecipient, PayrollRequest, Payslip,
};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait CompanyStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Company>>;
    async fn save(&self, company: Company) -> Result<Company>;
    /// Active companies, at most `limit` of them.
    async fn find_active(&self, limit: usize) -> Result<Vec<Company>>;
}

#[async_trait]
pub trait EmployeeStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Employee>>;
    /// Look up an employee by the company's own employee code.
    async fn find_by_code(&self, company_id: &str, employee_code: &str)
        -> Result<Option<Employee>>;
    /// Active employees of a company, at most `limit` of them, in a
    /// stable order.
    async fn find_active_by_company(&self, company_id: &str, limit: usize)
        -> Result<Vec<Employee>>;
    async fn save(&self, employee: Employee) -> Result<Employee>;
}

#[async_trait]
pub trait PayrollRequestStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<PayrollRequest>>;
    /// Insert a request.  A second request for the same company and
    /// payroll period is a conflict.
    async fn insert(&self, request: PayrollRequest) -> Result<PayrollRequest>;
    /// Replace a stored request if its stored version still equals
    /// `expected_version`.  The returned record carries the bumped
    /// version.  A mismatch, or moving onto a company and period another
    /// request already covers, is [`PayrollError::Conflict`].
    ///
    /// [`PayrollError::Conflict`]: crate::error::PayrollError::Conflict
    async fn update(&self, request: PayrollRequest, expected_version: u64)
        -> Result<PayrollRequest>;
    /// Requests whose payslip batch is pending or partial.
    async fn list_with_incomplete_batches(&self) -> Result<Vec<PayrollRequest>>;
}

#[async_trait]
pub trait PayslipStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Payslip>>;
    async fn find_by_request_and_employee(
        &self,
        request_id: &str,
        employee_id: &str,
    ) -> Result<Option<Payslip>>;
    /// Insert a payslip.  A second payslip for the same (request,
    /// employee) pair is a conflict.
    async fn insert(&self, payslip: Payslip) -> Result<Payslip>;
    async fn update(&self, payslip: Payslip) -> Result<Payslip>;
    async fn list_by_request(&self, request_id: &str) -> Result<Vec<Payslip>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Notification>>;
    async fn save(&self, notification: Notification) -> Result<Notification>;
    async fn get_recipient(&self, id: &str) -> Result<Option<NotificationRecipient>>;
    async fn find_recipient(
        &self,
        notification_id: &str,
        company_id: &str,
    ) -> Result<Option<NotificationRecipient>>;
    /// Insert a recipient.  A second recipient for the same
    /// (notification, company) pair is a conflict.
    async fn insert_recipient(&self, recipient: NotificationRecipient)
        -> Result<NotificationRecipient>;
    async fn update_recipient(&self, recipient: NotificationRecipient)
        -> Result<NotificationRecipient>;
    async fn list_recipients(&self, notification_id: &str) -> Result<Vec<NotificationRecipient>>;
    /// Unread deliveries to a company, newest first.
    async fn list_unread_for_company(&self, company_id: &str)
        -> Result<Vec<NotificationRecipient>>;
}

/// Handles to every store the engine uses.
#[derive(Clone)]
pub struct Storage {
    pub companies: Arc<dyn CompanyStore>,
    pub employees: Arc<dyn EmployeeStore>,
    pub requests: Arc<dyn PayrollRequestStore>,
    pub payslips: Arc<dyn PayslipStore>,
    pub notifications: Arc<dyn NotificationStore>,
}

impl Storage {
    /// Storage backed entirely by one in-memory store.
    pub fn in_memory() -> Self {
        Storage::from_memory(Arc::new(memory::MemoryStore::default()))
    }

    pub fn from_memory(store: Arc<memory::MemoryStore>) -> Self {
        Storage {
            companies: store.clone(),
            employees: store.clone(),
            requests: store.clone(),
            payslips: store.clone(),
            notifications: store,
        }
    }
}
