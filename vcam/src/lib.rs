pub mod core;
pub mod imgcodecs;
pub(crate) mod internal;
pub mod videoio;

// Re-export 核心类型，方便 prelude 使用
pub use crate::core::mat::Mat;
pub use vcam_core;
pub use vcam_sim;

/// 预置模块，用户可以通过 `use vcam::prelude::*;` 导入常用项
pub mod prelude {
    pub use crate::core::{Mat, TickMeter};
    pub use crate::imgcodecs::imwrite;
    pub use crate::videoio::VideoCapture;
    pub use vcam_core::prelude::*;
    pub use vcam_sim::ControlDevice;
}
