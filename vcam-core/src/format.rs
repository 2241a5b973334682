//! 格式与几何协商
//!
//! 所有派生字段 (bytes_per_line / image_size) 都由构造函数计算，
//! 调用方只能给出宽、高和像素布局。

use crate::error::{Result, VcamError};
use crate::pixel_format::{ColorScheme, Colorspace, FourCC, PixelLayout};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// 紧密排列时一帧的字节数 (帧文件就是这个大小)
    pub fn frame_size(&self, layout: PixelLayout) -> usize {
        self.width as usize * self.height as usize * layout.bytes_per_pixel() as usize
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// "WxH"，同时接受 ':' 和 ',' 作为分隔符
impl std::str::FromStr for Resolution {
    type Err = VcamError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(|c| matches!(c, 'x' | 'X' | ':' | ','));
        let mut next = || -> Result<u32> {
            parts
                .next()
                .and_then(|p| p.trim().parse().ok())
                .ok_or_else(|| VcamError::InvalidArgument(format!("bad resolution {s:?}")))
        };
        let width = next()?;
        let height = next()?;
        Ok(Self { width, height })
    }
}

/// 裁剪比例：输出尺寸的下限 = 原始尺寸 * numerator / denominator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CropRatio {
    pub numerator: u32,
    pub denominator: u32,
}

impl CropRatio {
    pub const FULL: Self = Self {
        numerator: 1,
        denominator: 1,
    };

    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// 0 < n <= d
    pub fn validate(&self) -> Result<()> {
        if self.denominator == 0 || self.numerator == 0 || self.numerator > self.denominator {
            return Err(VcamError::InvalidArgument(format!(
                "crop ratio {}/{} must satisfy 0 < n <= d",
                self.numerator, self.denominator
            )));
        }
        Ok(())
    }

    /// 截断整数除法
    pub fn min_of(&self, dim: u32) -> u32 {
        (dim as u64 * self.numerator as u64 / self.denominator as u64) as u32
    }
}

impl Default for CropRatio {
    fn default() -> Self {
        Self::FULL
    }
}

impl fmt::Display for CropRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl std::str::FromStr for CropRatio {
    type Err = VcamError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || VcamError::InvalidArgument(format!("bad crop ratio {s:?}, use n/d"));
        let mut parts = s.split(|c| matches!(c, '/' | ':' | ','));
        let numerator = parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .ok_or_else(bad)?;
        let denominator = parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .ok_or_else(bad)?;
        let ratio = Self::new(numerator, denominator);
        ratio.validate()?;
        Ok(ratio)
    }
}

/// 协商结果。字段只读，保证
/// `bytes_per_line >= width * bpp` 且 `image_size == bytes_per_line * height`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct OutputFormat {
    width: u32,
    height: u32,
    bytes_per_line: u32,
    image_size: u32,
    layout: PixelLayout,
    colorspace: Colorspace,
}

impl OutputFormat {
    /// 紧密排列的格式。尺寸超出 u32 时字段饱和；
    /// 来自控制面的尺寸请使用 [`OutputFormat::try_new`]。
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> Self {
        let bytes_per_line = width.saturating_mul(layout.bytes_per_pixel());
        Self {
            width,
            height,
            bytes_per_line,
            image_size: bytes_per_line.saturating_mul(height),
            layout,
            colorspace: layout.colorspace(),
        }
    }

    /// 紧密排列；一帧的字节数放不进 u32 时报 InvalidArgument
    pub fn try_new(width: u32, height: u32, layout: PixelLayout) -> Result<Self> {
        let bytes_per_line = width
            .checked_mul(layout.bytes_per_pixel())
            .ok_or_else(|| too_large(width, height, layout))?;
        Self::padded(width, height, layout, bytes_per_line)
    }

    /// 行尾带 padding 的格式，`bytes_per_line` 不能小于像素行宽
    pub fn padded(width: u32, height: u32, layout: PixelLayout, bytes_per_line: u32) -> Result<Self> {
        let row = width as u64 * layout.bytes_per_pixel() as u64;
        if (bytes_per_line as u64) < row {
            return Err(VcamError::InvalidArgument(format!(
                "bytes per line {} is shorter than a {}x{} {} row ({} bytes)",
                bytes_per_line,
                width,
                height,
                layout.fourcc(),
                row
            )));
        }
        let image_size = bytes_per_line
            .checked_mul(height)
            .ok_or_else(|| too_large(width, height, layout))?;
        Ok(Self {
            width,
            height,
            bytes_per_line,
            image_size,
            layout,
            colorspace: layout.colorspace(),
        })
    }

    pub fn with_resolution(res: Resolution, layout: PixelLayout) -> Self {
        Self::new(res.width, res.height, layout)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn bytes_per_line(&self) -> u32 {
        self.bytes_per_line
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn colorspace(&self) -> Colorspace {
        self.colorspace
    }

    pub fn fourcc(&self) -> FourCC {
        self.layout.fourcc()
    }

    /// 一行里真正有像素的字节数
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.layout.bytes_per_pixel() as usize
    }

    /// TRY_FMT 语义：分辨率固定为当前值；不支持的 FourCC
    /// 静默替换为当前格式，永远不报错。
    pub fn try_pixel_format(&self, requested: FourCC) -> OutputFormat {
        match PixelLayout::from_fourcc(requested) {
            Some(layout) => Self::try_new(self.width, self.height, layout).unwrap_or(*self),
            None => {
                tracing::debug!(
                    target: "vcam::format",
                    "Unsupported pixel format {}, keeping {}",
                    requested,
                    self.fourcc()
                );
                *self
            }
        }
    }
}

fn too_large(width: u32, height: u32, layout: PixelLayout) -> VcamError {
    VcamError::InvalidArgument(format!(
        "{}x{} {} frame does not fit in {} bytes",
        width,
        height,
        layout.fourcc(),
        u32::MAX
    ))
}

/// 控制面提交的一次格式请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatRequest {
    /// 原始 (裁剪前) 分辨率
    pub origin: Resolution,
    /// 期望输出分辨率，0 表示使用 fallback
    pub width: u32,
    pub height: u32,
    pub crop: CropRatio,
    pub bits_per_pixel: Option<u32>,
    pub color_scheme: ColorScheme,
}

/// 返回 (最小, 最大) 输出分辨率
pub fn crop_bounds(origin: Resolution, crop: CropRatio) -> Result<(Resolution, Resolution)> {
    crop.validate()?;
    let min = Resolution::new(crop.min_of(origin.width), crop.min_of(origin.height));
    Ok((min, origin))
}

/// 核心：格式协商算法
///
/// 1. 请求面积为 0 时使用调用方提供的 fallback 分辨率；
/// 2. 每个轴独立夹紧到 `[orig * n / d, orig]`；
/// 3. 像素布局优先取色彩方案，其次取 bpp，都无法识别时保留 `current`；
/// 4. bytes_per_line / image_size 重新计算，从不信任请求；
///    原始帧或输出帧放不进 u32 时报 InvalidArgument。
pub fn negotiate(
    req: &FormatRequest,
    fallback: Resolution,
    current: PixelLayout,
) -> Result<OutputFormat> {
    if req.origin.is_empty() {
        return Err(VcamError::InvalidArgument(format!(
            "origin resolution {} has a zero dimension",
            req.origin
        )));
    }
    let (min, max) = crop_bounds(req.origin, req.crop)?;

    let requested = if req.width as u64 * req.height as u64 == 0 {
        fallback
    } else {
        Resolution::new(req.width, req.height)
    };

    let width = requested.width.clamp(min.width, max.width);
    let height = requested.height.clamp(min.height, max.height);

    let layout = req
        .color_scheme
        .layout()
        .or_else(|| {
            req.bits_per_pixel
                .and_then(|bpp| ColorScheme::from_bits_per_pixel(bpp).layout())
        })
        .unwrap_or(current);

    // 帧源按原始分辨率存放，同样要放得下
    OutputFormat::try_new(req.origin.width, req.origin.height, layout)?;
    let fmt = OutputFormat::try_new(width, height, layout)?;
    tracing::debug!(
        target: "vcam::format",
        "Negotiated {}x{} {} (origin {}, crop {}), bytesperline={}, sizeimage={}",
        fmt.width,
        fmt.height,
        fmt.fourcc(),
        req.origin,
        req.crop,
        fmt.bytes_per_line,
        fmt.image_size
    );
    Ok(fmt)
}
