use anyhow::{anyhow, Result};
use std::fmt;
use vcam_core::frame::Frame;
use vcam_core::pixel_format::PixelLayout;

/// 最简单的图像容器
/// 3 通道时按 OpenCV 习惯使用 BGR 顺序，1 通道为灰度
#[derive(Clone, Default)]
pub struct Mat {
    pub data: Vec<u8>,
    pub rows: i32,
    pub cols: i32,
    /// 每一行占用的字节数 (Stride)
    /// 对于 Packed 图像，step = cols * channels
    pub step: usize,
    pub channels: u8,
}

impl Mat {
    pub fn new(rows: i32, cols: i32, channels: u8) -> Self {
        let step = (cols * channels as i32) as usize;
        let size = (rows as usize) * step;
        Self {
            data: vec![0; size],
            rows,
            cols,
            step,
            channels,
        }
    }

    /// 创建一个空的 Mat (通常用于作为输出 buffer)
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.rows == 0 || self.cols == 0
    }

    /// 一行的像素字节 (忽略行尾 Padding)
    pub fn row_bytes(&self, row: i32) -> &[u8] {
        let start = (row as usize) * self.step;
        let end = start + (self.cols as usize * self.channels as usize);
        &self.data[start..end]
    }

    /// 从设备帧构造：GREY → 1 通道，RGB3 / YUYV → 3 通道 BGR。
    /// 源帧的 stride 可能大于像素宽度，这里总是输出紧密排列的 Mat。
    pub fn from_frame(frame: &Frame<'_>) -> Result<Self> {
        let layout = PixelLayout::from_fourcc(frame.format)
            .ok_or_else(|| anyhow!("Unsupported frame format {}", frame.format))?;
        let (w, h) = (frame.width as usize, frame.height as usize);
        let src_row = w * layout.bytes_per_pixel() as usize;
        if frame.stride < src_row || frame.data.len() < frame.stride * h.saturating_sub(1) + src_row {
            return Err(anyhow!(
                "Frame {}x{} {} truncated: {} bytes, stride {}",
                w,
                h,
                frame.format,
                frame.data.len(),
                frame.stride
            ));
        }
        let rows = frame.data.chunks(frame.stride).take(h).map(|r| &r[..src_row]);

        let mut mat = Mat::new(h as i32, w as i32, channels_for(layout));
        let step = mat.step;

        for (src, dst) in rows.zip(mat.data.chunks_mut(step)) {
            match layout {
                PixelLayout::Grey => dst.copy_from_slice(src),
                PixelLayout::Rgb24 => {
                    for (s, d) in src.chunks_exact(3).zip(dst.chunks_exact_mut(3)) {
                        d.copy_from_slice(&[s[2], s[1], s[0]]);
                    }
                }
                PixelLayout::Yuyv => yuyv_row_to_bgr(src, dst),
            }
        }
        Ok(mat)
    }
}

/// BT.601 有限范围，整数近似
fn yuv_to_bgr(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 298 * (y as i32 - 16);
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clip = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clip(c + 516 * d),
        clip(c - 100 * d - 208 * e),
        clip(c + 409 * e),
    ]
}

/// 一行 YUYV (Y0 U Y1 V) 转 BGR；奇数宽度的最后半个宏像素复用上一组色度
fn yuyv_row_to_bgr(src: &[u8], dst: &mut [u8]) {
    let mut last_uv = (128, 128);
    for (x, px) in dst.chunks_exact_mut(3).enumerate() {
        let base = (x / 2) * 4;
        let y = src.get(base + (x % 2) * 2).copied().unwrap_or(0);
        let u = src.get(base + 1).copied().unwrap_or(last_uv.0);
        let v = src.get(base + 3).copied().unwrap_or(last_uv.1);
        last_uv = (u, v);
        px.copy_from_slice(&yuv_to_bgr(y, u, v));
    }
}

/// 像素布局对应的 Mat 通道数
pub fn channels_for(layout: PixelLayout) -> u8 {
    match layout {
        PixelLayout::Grey => 1,
        PixelLayout::Rgb24 | PixelLayout::Yuyv => 3,
    }
}

impl fmt::Debug for Mat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mat")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("channels", &self.channels)
            .field("step", &self.step)
            .finish()
    }
}
