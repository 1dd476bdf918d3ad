//! Shared types and error taxonomy for cmdwatch.

pub mod error;
pub mod types;

pub use error::AppError;
pub use types::{
    CompletionRecord, ContentItem, ExitInfo, ProgressUpdate, SessionStatus, SignalSpec, ToolResult,
};
