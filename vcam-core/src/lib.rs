// 开启一些 Clippy 检查，保证代码质量
#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

// 模块定义
pub mod builder;
pub mod error;
pub mod format;
pub mod frame;
pub mod pixel_format;
pub mod spec;
pub mod telemetry;
pub mod time;
pub mod traits;

// 方便用户使用的 Prelude
pub mod prelude {
    pub use crate::builder::{FrameLoading, RegistryConfig};
    pub use crate::error::{Result, VcamError};
    pub use crate::format::{negotiate, CropRatio, FormatRequest, OutputFormat, Resolution};
    pub use crate::frame::{BufferState, Frame, FrameBuffer, FrameMetadata, Timestamp};
    pub use crate::pixel_format::{ColorScheme, FourCC, PixelLayout};
    pub use crate::spec::{DeviceSpec, DeviceSpecPatch, SpecChanges};
    pub use crate::time::FrameInterval;
    pub use crate::traits::{BufferSink, ControlPlane, Stream};
}

// 重新导出依赖中的关键类型，避免用户版本冲突
pub use async_trait::async_trait;
pub use futures_core::Stream as FuturesStream;

// 版本与构建信息常量
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
