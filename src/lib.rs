//! Payroll Engine library crate.
//!
//! This crate exposes the payroll request core as reusable modules:
//! deduction calculation ([`deduction`]), company-wide aggregation
//! ([`engine`]), the request lifecycle ([`workflow`]), payslip
//! generation ([`payslip`]) and notification fan-out
//! ([`notification`]).  [`service::PayrollService`] wires them to the
//! store traits in [`store`]; [`api::build_router`] serves the service
//! over HTTP.

pub mod api;
pub mod config;
pub mod deduction;
pub mod engine;
pub mod error;
pub mod models;
pub mod money;
pub mod notification;
pub mod payslip;
pub mod service;
pub mod store;
pub mod workflow;
