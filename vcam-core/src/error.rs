use thiserror::Error;

#[derive(Error, Debug)]
pub enum VcamError {
    #[error("Device index {index} out of range (count {count})")]
    OutOfRange { index: usize, count: usize },

    #[error("Device registry full: at most {max} devices")]
    CapacityExceeded { max: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Device busy: consumer still holds {outstanding} buffer(s)")]
    Busy { outstanding: usize },

    #[error("Failed to allocate {bytes} bytes for frame storage")]
    AllocationFailed { bytes: usize },

    #[error("Device disconnected: {0}")]
    Disconnected(String),

    #[error("Stream not started")]
    StreamNotStarted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VcamError {
    /// 只有内存分配失败会让 create/modify 整体失败，
    /// 其余帧源错误都降级为合成帧。
    pub fn is_fatal_to_request(&self) -> bool {
        matches!(self, Self::AllocationFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, VcamError>;
