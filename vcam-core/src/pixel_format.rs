use std::fmt::{self, Display};

/// 四字符代码 (Four Character Code)，视频工业标准
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FourCC(pub u32);

impl FourCC {
    /// 从 ASCII 字符创建 FourCC
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self((a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24))
    }

    /// RGB24 (Big Endian: R-G-B)
    pub const RGB3: Self = Self::new(b'R', b'G', b'B', b'3');
    /// YUYV 4:2:2 packed
    pub const YUYV: Self = Self::new(b'Y', b'U', b'Y', b'V');
    /// 8-bit 单通道灰度
    pub const GREY: Self = Self::new(b'G', b'R', b'E', b'Y');
}

impl Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();

        write!(f, "{}", String::from_utf8_lossy(&bytes))
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({})", self)
    }
}

/// 虚拟设备能输出的像素布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum PixelLayout {
    /// R-G-B 交错，3 字节/像素
    Rgb24,
    /// Y0-U-Y1-V 宏像素，2 字节/像素
    Yuyv,
    /// 单通道 8-bit
    Grey,
}

impl PixelLayout {
    pub const ALL: [PixelLayout; 3] = [Self::Rgb24, Self::Yuyv, Self::Grey];

    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgb24 => 3,
            Self::Yuyv => 2,
            Self::Grey => 1,
        }
    }

    pub const fn fourcc(self) -> FourCC {
        match self {
            Self::Rgb24 => FourCC::RGB3,
            Self::Yuyv => FourCC::YUYV,
            Self::Grey => FourCC::GREY,
        }
    }

    pub const fn colorspace(self) -> Colorspace {
        match self {
            Self::Yuyv => Colorspace::Smpte170m,
            Self::Rgb24 | Self::Grey => Colorspace::Srgb,
        }
    }

    /// 反查 FourCC；不支持的格式返回 None，由协商层决定如何回退
    pub fn from_fourcc(cc: FourCC) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.fourcc() == cc)
    }
}

impl From<PixelLayout> for FourCC {
    fn from(layout: PixelLayout) -> Self {
        layout.fourcc()
    }
}

/// RGB24 的单个像素，可以用 bytemuck 直接从字节行转换
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Rgb24 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb24 {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Colorspace {
    Srgb,
    Smpte170m,
}

/// 控制面上的色彩方案。`Unset` 表示 "保持不变 / 使用默认"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum ColorScheme {
    Rgb24,
    Yuv422,
    Grey8,
    #[default]
    Unset,
}

impl ColorScheme {
    /// bpp 到色彩方案的映射：24 → RGB，16 → YUV，8 → GREY
    pub fn from_bits_per_pixel(bpp: u32) -> Self {
        match bpp {
            24 => Self::Rgb24,
            16 => Self::Yuv422,
            8 => Self::Grey8,
            _ => Self::Unset,
        }
    }

    pub fn bits_per_pixel(self) -> Option<u32> {
        self.layout().map(|l| l.bytes_per_pixel() * 8)
    }

    pub fn layout(self) -> Option<PixelLayout> {
        match self {
            Self::Rgb24 => Some(PixelLayout::Rgb24),
            Self::Yuv422 => Some(PixelLayout::Yuyv),
            Self::Grey8 => Some(PixelLayout::Grey),
            Self::Unset => None,
        }
    }

    pub fn is_set(self) -> bool {
        self != Self::Unset
    }
}

impl From<PixelLayout> for ColorScheme {
    fn from(layout: PixelLayout) -> Self {
        match layout {
            PixelLayout::Rgb24 => Self::Rgb24,
            PixelLayout::Yuyv => Self::Yuv422,
            PixelLayout::Grey => Self::Grey8,
        }
    }
}

impl std::str::FromStr for ColorScheme {
    type Err = crate::error::VcamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RGB" | "RGB24" => Ok(Self::Rgb24),
            "YUV" | "YUV422" | "YUYV" => Ok(Self::Yuv422),
            "GRAY8" | "GREY8" | "GRAY" | "GREY" => Ok(Self::Grey8),
            _ => Err(crate::error::VcamError::InvalidArgument(format!(
                "unsupported color scheme {s}, use RGB, YUV or GRAY8"
            ))),
        }
    }
}

impl Display for ColorScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rgb24 => "rgb24",
            Self::Yuv422 => "yuv422",
            Self::Grey8 => "gray8",
            Self::Unset => "unset",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_prints_ascii() {
        assert_eq!(FourCC::YUYV.to_string(), "YUYV");
        assert_eq!(format!("{:?}", FourCC::GREY), "FourCC(GREY)");
    }

    #[test]
    fn scheme_and_bpp_agree() {
        for layout in PixelLayout::ALL {
            let scheme = ColorScheme::from(layout);
            let bpp = scheme.bits_per_pixel().unwrap();
            assert_eq!(ColorScheme::from_bits_per_pixel(bpp), scheme);
            assert_eq!(PixelLayout::from_fourcc(layout.fourcc()), Some(layout));
        }
        assert_eq!(ColorScheme::from_bits_per_pixel(12), ColorScheme::Unset);
    }

    #[test]
    fn rgb_rows_cast_without_copy() {
        let row = [0u8, 255, 0, 10, 20, 30];
        let px: &[Rgb24] = bytemuck::cast_slice(&row);
        assert_eq!(px, &[Rgb24::new(0, 255, 0), Rgb24::new(10, 20, 30)]);
    }

    #[test]
    fn scheme_parses_cli_names() {
        assert_eq!("RGB".parse::<ColorScheme>().unwrap(), ColorScheme::Rgb24);
        assert_eq!("GRAY8".parse::<ColorScheme>().unwrap(), ColorScheme::Grey8);
        assert!("HSV".parse::<ColorScheme>().is_err());
    }
}
