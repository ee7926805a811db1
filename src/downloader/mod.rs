// 下载管道模块

pub mod cli;
pub mod listing;
pub mod monitor;
pub mod runner;

pub use cli::{CliStatus, RemoteCli};
pub use listing::{parse_listing, RemoteEntry};
pub use monitor::{TransferMonitor, TransferOutcome};
pub use runner::DownloadRunner;
