// 公共模块

pub mod pause;
pub mod stall_detector;

pub use pause::{PauseController, PauseSignal};
pub use stall_detector::{StallConfig, StallDetector, StallPolicy};
