// 上传管道模块

pub mod pipeline;
pub mod scanner;
pub mod task;

pub use pipeline::{UploadOutcome, UploadPipeline, UploadResult};
pub use scanner::{ScanOptions, UploadScanner};
pub use task::{Task, TaskStatus};
