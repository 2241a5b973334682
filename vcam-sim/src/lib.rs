#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod control;
pub mod device;
pub mod pipeline;
pub mod producer;
pub mod registry;
pub mod source;
pub mod videobuf;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use control::ControlDevice;
pub use device::{DeviceId, VirtualDevice};
pub use registry::DeviceRegistry;
pub use videobuf::{BufferQueue, CaptureStream};

// 被 poison 的锁仍然可用：锁内只有簿记，不会留下半更新的状态
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
