//! Runtime configuration.
//!
//! Settings come from environment variables (a `.env` file is honoured
//! by the binary).  Every setting has a default so the engine runs
//! without any configuration at all.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default bind address of the HTTP server.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

/// Hard cap on the number of active employees read for one company.
pub const DEFAULT_EMPLOYEE_QUERY_CAP: usize = 1000;

/// Maximum number of employees a payroll request may carry deduction
/// overrides for.
pub const DEFAULT_MAX_REQUEST_EMPLOYEES: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Address the HTTP server binds to (`PAYROLL_BIND_ADDR`).
    pub bind_addr: String,
    /// Upper bound on active employees per company query
    /// (`PAYROLL_EMPLOYEE_QUERY_CAP`).  A company with more active
    /// employees than this cannot be aggregated.
    pub employee_query_cap: usize,
    /// Upper bound on per-employee deduction entries in one request
    /// (`PAYROLL_MAX_REQUEST_EMPLOYEES`).
    pub max_request_employees: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            employee_query_cap: DEFAULT_EMPLOYEE_QUERY_CAP,
            max_request_employees: DEFAULT_MAX_REQUEST_EMPLOYEES,
        }
    }
}

impl EngineConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.  Missing
    /// keys fall back to the defaults; malformed numbers are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = EngineConfig::default();
        let bind_addr = lookup("PAYROLL_BIND_ADDR").unwrap_or(defaults.bind_addr);
        let employee_query_cap = match lookup("PAYROLL_EMPLOYEE_QUERY_CAP") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("PAYROLL_EMPLOYEE_QUERY_CAP is not a number: {raw}"))?,
            None => defaults.employee_query_cap,
        };
        let max_request_employees = match lookup("PAYROLL_MAX_REQUEST_EMPLOYEES") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("PAYROLL_MAX_REQUEST_EMPLOYEES is not a number: {raw}"))?,
            None => defaults.max_request_employees,
        };
        Ok(EngineConfig {
            bind_addr,
            employee_query_cap,
            max_request_employees,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_unset() {
        let config = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.employee_query_cap, 1000);
        assert_eq!(config.max_request_employees, 50);
    }

    #[test]
    fn test_overrides_and_bad_numbers() {
        let mut env = HashMap::new();
        env.insert("PAYROLL_BIND_ADDR", "0.0.0.0:8080".to_string());
        env.insert("PAYROLL_EMPLOYEE_QUERY_CAP", "25".to_string());
        let config = EngineConfig::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.employee_query_cap, 25);

        env.insert("PAYROLL_MAX_REQUEST_EMPLOYEES", "lots".to_string());
        assert!(EngineConfig::from_lookup(|k| env.get(k).cloned()).is_err());
    }
}
