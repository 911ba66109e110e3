//! preview: render scheduling for file previews.
//!
//! Submitted files become generated assets, one per template. Each asset is
//! admitted against its renderer kind's capacity budget, dispatched to a
//! worker pool and driven to a terminal status exactly once.

// Core modules
pub mod assets;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod render;
pub mod scheduler;
pub mod storage;
pub mod template;

// Re-export commonly used error types
pub use error::{ErrorCode, SchedulerError, TemplateError, TransferError};
