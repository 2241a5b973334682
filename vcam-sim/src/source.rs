//! 帧源：帧 N 的像素从哪里来
//!
//! * `Synthetic` —— 按格式生成固定图案
//! * `Preloaded` —— 一次性读入的连续内存 (arena)
//! * `Streamed`  —— 每个 tick 从磁盘读一帧

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use vcam_core::builder::FrameLoading;
use vcam_core::error::{Result, VcamError};
use vcam_core::format::OutputFormat;
use vcam_core::pixel_format::{PixelLayout, Rgb24};

const SYNTH_RGB: Rgb24 = Rgb24::new(0, 255, 0);
const SYNTH_GREY: u8 = 128;
// Y0 U Y1 V
const SYNTH_YUYV: [u8; 4] = [50, 255, 50, 0];

/// 帧文件名：`output_NNNN.raw`，编号从 1 开始
pub fn frame_file_path(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("output_{:04}.raw", index + 1))
}

/// 统计目录下的 `output_*.raw` 文件数
pub fn count_frame_files(dir: &Path) -> Result<u32> {
    let entries = fs::read_dir(dir).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => VcamError::NotFound(format!("frames dir {}", dir.display())),
        _ => VcamError::Io(e),
    })?;

    let mut count = 0;
    for entry in entries {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("output_") && name.ends_with(".raw") {
            count += 1;
        }
    }
    Ok(count)
}

/// 精确读取一帧；文件缺失报 NotFound，长度不足报 Io(UnexpectedEof)
fn read_frame_file(path: &Path, dst: &mut [u8]) -> Result<()> {
    let mut file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => VcamError::NotFound(format!("frame file {}", path.display())),
        _ => VcamError::Io(e),
    })?;
    file.read_exact(dst).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            VcamError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "short frame file {}, expected {} bytes",
                    path.display(),
                    dst.len()
                ),
            ))
        } else {
            VcamError::Io(e)
        }
    })
}

/// 按格式写入固定图案，逐行处理 (bytes_per_line 可能大于像素宽度)。
/// 行尾的 padding 清零。
pub fn fill_synthetic(buffer: &mut [u8], format: &OutputFormat) {
    let stride = format.bytes_per_line() as usize;
    let row_bytes = format.row_bytes();
    if stride == 0 {
        return;
    }

    for line in buffer.chunks_mut(stride).take(format.height() as usize) {
        let used = row_bytes.min(line.len());
        let (pixels, padding) = line.split_at_mut(used);

        match format.layout() {
            PixelLayout::Rgb24 => {
                let whole = pixels.len() - pixels.len() % 3;
                let px: &mut [Rgb24] = bytemuck::cast_slice_mut(&mut pixels[..whole]);
                px.fill(SYNTH_RGB);
            }
            PixelLayout::Grey => pixels.fill(SYNTH_GREY),
            PixelLayout::Yuyv => {
                let mut macro_px = pixels.chunks_exact_mut(4);
                for mp in &mut macro_px {
                    mp.copy_from_slice(&SYNTH_YUYV);
                }
                // 奇数宽度剩下半个宏像素
                let rest = macro_px.into_remainder();
                let n = rest.len();
                rest.copy_from_slice(&SYNTH_YUYV[..n]);
            }
        }
        padding.fill(0);
    }
}

/// 连续内存里的 N 帧
///
/// 由 [`FrameArena::build`] 一次性构建：要么全部读入成功返回新 arena，
/// 要么返回错误，中间状态不会逃逸出构建函数。
pub struct FrameArena {
    data: Vec<u8>,
    /// (offset, len)
    slots: Vec<(usize, usize)>,
    dir: PathBuf,
}

impl FrameArena {
    pub fn build(dir: &Path, frame_count: u32, frame_size: usize) -> Result<Self> {
        if frame_count == 0 || frame_size == 0 {
            return Err(VcamError::InvalidArgument(format!(
                "cannot preload {frame_count} frames of {frame_size} bytes"
            )));
        }

        let total = (frame_count as usize)
            .checked_mul(frame_size)
            .ok_or(VcamError::AllocationFailed { bytes: usize::MAX })?;

        let mut data = Vec::new();
        data.try_reserve_exact(total)
            .map_err(|_| VcamError::AllocationFailed { bytes: total })?;
        data.resize(total, 0);

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(frame_count as usize)
            .map_err(|_| VcamError::AllocationFailed {
                bytes: frame_count as usize * std::mem::size_of::<(usize, usize)>(),
            })?;

        for i in 0..frame_count {
            let offset = i as usize * frame_size;
            let path = frame_file_path(dir, i);
            if let Err(e) = read_frame_file(&path, &mut data[offset..offset + frame_size]) {
                tracing::error!(target: "vcam::source", "Failed to load frame {}: {}", i, e);
                return Err(e);
            }
            slots.push((offset, frame_size));
        }

        tracing::info!(
            target: "vcam::source",
            "Successfully loaded {} frames from {}",
            frame_count,
            dir.display()
        );

        Ok(Self {
            data,
            slots,
            dir: dir.to_path_buf(),
        })
    }

    pub fn frame_count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// 槽位 `index mod frame_count` 的只读视图，不拷贝
    pub fn frame(&self, index: u32) -> &[u8] {
        let (offset, len) = self.slots[index as usize % self.slots.len()];
        &self.data[offset..offset + len]
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for FrameArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameArena")
            .field("dir", &self.dir)
            .field("frames", &self.slots.len())
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// 按需读盘：每个 tick 读一帧到临时 buffer
#[derive(Debug, Clone)]
pub struct StreamedDisk {
    dir: PathBuf,
    frame_count: u32,
    frame_size: usize,
}

impl StreamedDisk {
    pub fn new(dir: &Path, frame_count: u32, frame_size: usize) -> Result<Self> {
        if frame_count == 0 || frame_size == 0 {
            return Err(VcamError::InvalidArgument(format!(
                "cannot stream {frame_count} frames of {frame_size} bytes"
            )));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            frame_count,
            frame_size,
        })
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// 读取文件 `index mod frame_count` 的前 frame_size 字节到 `scratch`
    pub fn read_frame(&self, index: u32, scratch: &mut Vec<u8>) -> Result<()> {
        scratch.resize(self.frame_size, 0);
        let path = frame_file_path(&self.dir, index % self.frame_count);
        read_frame_file(&path, scratch)
    }
}

#[derive(Debug, Default)]
pub enum FrameSource {
    #[default]
    Synthetic,
    Preloaded(FrameArena),
    Streamed(StreamedDisk),
}

impl FrameSource {
    /// 按加载方式构建文件帧源
    pub fn build(
        dir: &Path,
        frame_count: u32,
        frame_size: usize,
        loading: FrameLoading,
    ) -> Result<Self> {
        match loading {
            FrameLoading::Preload => {
                FrameArena::build(dir, frame_count, frame_size).map(Self::Preloaded)
            }
            FrameLoading::OnDemand => {
                if !dir.is_dir() {
                    return Err(VcamError::NotFound(format!(
                        "frames dir {}",
                        dir.display()
                    )));
                }
                StreamedDisk::new(dir, frame_count, frame_size).map(Self::Streamed)
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Synthetic => "synthetic",
            Self::Preloaded(_) => "preloaded",
            Self::Streamed(_) => "streamed",
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Synthetic)
    }

    pub fn frame_count(&self) -> u32 {
        match self {
            Self::Synthetic => 0,
            Self::Preloaded(a) => a.frame_count(),
            Self::Streamed(s) => s.frame_count(),
        }
    }

    /// 帧 `index` 的原始字节；合成帧返回 `Ok(None)`。
    /// 按需读盘时数据写入 `scratch`。
    pub fn frame_bytes<'a>(
        &'a self,
        index: u32,
        scratch: &'a mut Vec<u8>,
    ) -> Result<Option<&'a [u8]>> {
        match self {
            Self::Synthetic => Ok(None),
            Self::Preloaded(arena) => Ok(Some(arena.frame(index))),
            Self::Streamed(disk) => {
                disk.read_frame(index, scratch)?;
                Ok(Some(scratch.as_slice()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_files_are_one_based() {
        let p = frame_file_path(Path::new("/frames"), 0);
        assert_eq!(p, PathBuf::from("/frames/output_0001.raw"));
        let p = frame_file_path(Path::new("/frames"), 41);
        assert_eq!(p, PathBuf::from("/frames/output_0042.raw"));
    }

    #[test]
    fn synthetic_rgb_respects_stride() {
        // 宽 2、高 2 的 RGB24，每行 8 字节：2 字节 padding 里是垃圾
        let fmt = OutputFormat::padded(2, 2, PixelLayout::Rgb24, 8).unwrap();
        let mut buf = vec![0xAAu8; fmt.image_size() as usize];
        fill_synthetic(&mut buf, &fmt);
        assert_eq!(
            buf,
            vec![0, 255, 0, 0, 255, 0, 0, 0, 0, 255, 0, 0, 255, 0, 0, 0]
        );
    }

    #[test]
    fn synthetic_yuyv_and_grey_zero_their_padding() {
        let fmt = OutputFormat::padded(2, 2, PixelLayout::Yuyv, 6).unwrap();
        let mut buf = vec![0xAAu8; fmt.image_size() as usize];
        fill_synthetic(&mut buf, &fmt);
        assert_eq!(buf, vec![50, 255, 50, 0, 0, 0, 50, 255, 50, 0, 0, 0]);

        let fmt = OutputFormat::padded(3, 2, PixelLayout::Grey, 5).unwrap();
        let mut buf = vec![0xAAu8; fmt.image_size() as usize];
        fill_synthetic(&mut buf, &fmt);
        assert_eq!(buf, vec![128, 128, 128, 0, 0, 128, 128, 128, 0, 0]);
    }

    #[test]
    fn synthetic_yuyv_handles_odd_width() {
        let fmt = OutputFormat::new(3, 1, PixelLayout::Yuyv);
        let mut buf = vec![0u8; fmt.image_size() as usize];
        fill_synthetic(&mut buf, &fmt);
        assert_eq!(buf, vec![50, 255, 50, 0, 50, 255]);
    }

    #[test]
    fn synthetic_grey_is_mid_grey() {
        let fmt = OutputFormat::new(4, 3, PixelLayout::Grey);
        let mut buf = vec![0u8; fmt.image_size() as usize];
        fill_synthetic(&mut buf, &fmt);
        assert!(buf.iter().all(|&b| b == SYNTH_GREY));
    }

    #[test]
    fn synthetic_source_has_no_bytes() {
        let mut scratch = Vec::new();
        let src = FrameSource::Synthetic;
        assert!(src.frame_bytes(3, &mut scratch).unwrap().is_none());
        assert_eq!(src.kind(), "synthetic");
    }
}
