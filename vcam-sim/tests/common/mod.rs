#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::time::Duration;

use vcam_sim::source::frame_file_path;

/// 生产线程的第一个 tick 在启动后立即执行；给调度留一点余量
pub const FIRST_FRAME_SLACK: Duration = Duration::from_millis(250);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("vcam=debug")
        .try_init();
}

/// 写出 `count` 个 `output_NNNN.raw`，像素值由 `pixel(frame, row, col)` 给出
pub fn write_frames(
    dir: &Path,
    count: u32,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    pixel: impl Fn(u32, u32, u32) -> u8,
) -> std::io::Result<()> {
    for k in 0..count {
        let mut data = Vec::with_capacity((width * height * bytes_per_pixel) as usize);
        for row in 0..height {
            for col in 0..width * bytes_per_pixel {
                data.push(pixel(k, row, col));
            }
        }
        fs::write(frame_file_path(dir, k), data)?;
    }
    Ok(())
}
