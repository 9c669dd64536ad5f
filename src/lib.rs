//! Student activity portal: activity records of eleven kinds per student,
//! filtered and summarised for staff, exported as CSV, JSON or `.xlsx`.

pub mod activity;
pub mod batches;
pub mod completion;
pub mod config;
pub mod contact;
pub mod context;
pub mod error;
pub mod export;
pub mod filters;
pub mod http;
pub mod models;
pub mod query;
pub mod records;
pub mod roster;
pub mod store;
