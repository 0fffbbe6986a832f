//! Accuracy and consistency evaluation of a CDT code classification service.
//!
//! A fixed catalog of procedure descriptions is sent to the service under
//! bounded concurrency; answers are scored against expected codes, repeated
//! runs are checked for agreement, and per-case status is persisted so later
//! sessions can narrow to the cases that still need work.

pub mod catalog;
pub mod client;
pub mod config;
pub mod consistency;
pub mod engine;
pub mod errors;
pub mod evaluator;
pub mod manager;
pub mod model;
pub mod parse;
pub mod providers;
pub mod report;
pub mod storage;
pub mod tuner;

pub use catalog::TestCatalog;
pub use client::ClassificationClient;
pub use config::EvalConfig;
pub use engine::Dispatcher;
pub use manager::{RunReport, TestManager};
pub use storage::ResultStore;
