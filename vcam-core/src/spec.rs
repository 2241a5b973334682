use crate::error::{Result, VcamError};
use crate::format::{CropRatio, Resolution};
use crate::pixel_format::ColorScheme;
use bitflags::bitflags;
use std::path::PathBuf;

/// 曝光基准值 (100 = 不改变)
pub const EXPOSURE_BASELINE: i32 = 100;
/// 增益基准值 (50 = 不改变)
pub const GAIN_BASELINE: i32 = 50;
/// 控制面接受的最大帧率
pub const FPS_MAX: u32 = 1000;
pub const EXPOSURE_MAX: i32 = 1000;
pub const GAIN_MAX: i32 = 1000;

fn check_fps(fps: u32) -> Result<()> {
    if fps > FPS_MAX {
        return Err(VcamError::InvalidArgument(format!(
            "fps {fps} exceeds the maximum of {FPS_MAX}"
        )));
    }
    Ok(())
}

fn check_tone(name: &str, value: i32, max: i32) -> Result<()> {
    if !(0..=max).contains(&value) {
        return Err(VcamError::InvalidArgument(format!(
            "{name} {value} is outside 0..={max}"
        )));
    }
    Ok(())
}

/// 控制面的请求/响应 DTO
///
/// 创建和修改时被整体拷贝进设备，设备之间从不共享。
/// `video_node` 只在 GetDevice 的响应里有意义。
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialize",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct DeviceSpec {
    pub index: usize,
    /// 原始 (裁剪前) 分辨率，帧文件按这个尺寸存储
    pub orig_width: u32,
    pub orig_height: u32,
    /// 输出分辨率 (裁剪后)
    pub width: u32,
    pub height: u32,
    pub crop_ratio: CropRatio,
    pub fps: u32,
    pub exposure: i32,
    pub gain: i32,
    pub bits_per_pixel: u32,
    pub color_scheme: ColorScheme,
    /// 为空表示使用合成帧
    pub frames_dir: PathBuf,
    pub frame_count: u32,
    pub looping: bool,
    pub frame_index: u32,
    pub video_node: String,
}

impl Default for DeviceSpec {
    fn default() -> Self {
        Self {
            index: 0,
            orig_width: 800,
            orig_height: 700,
            width: 800,
            height: 700,
            crop_ratio: CropRatio::FULL,
            fps: 30,
            exposure: EXPOSURE_BASELINE,
            gain: GAIN_BASELINE,
            bits_per_pixel: 8,
            color_scheme: ColorScheme::Grey8,
            frames_dir: PathBuf::new(),
            frame_count: 0,
            looping: true,
            frame_index: 0,
            video_node: String::new(),
        }
    }
}

impl DeviceSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn origin(&self) -> Resolution {
        Resolution::new(self.orig_width, self.orig_height)
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// 帧率、曝光、增益和裁剪比例是否在可接受范围内
    pub fn validate(&self) -> Result<()> {
        check_fps(self.fps)?;
        check_tone("exposure", self.exposure, EXPOSURE_MAX)?;
        check_tone("gain", self.gain, GAIN_MAX)?;
        self.crop_ratio.validate()
    }

    /// 是否配置了基于文件的帧源
    pub fn has_frame_source(&self) -> bool {
        !self.frames_dir.as_os_str().is_empty() && self.frame_count > 0
    }

    /// 设置原始分辨率
    pub fn with_origin(mut self, w: u32, h: u32) -> Self {
        self.orig_width = w;
        self.orig_height = h;
        self
    }

    /// 设置输出分辨率
    pub fn with_resolution(mut self, w: u32, h: u32) -> Self {
        self.width = w;
        self.height = h;
        self
    }

    pub fn with_crop(mut self, numerator: u32, denominator: u32) -> Self {
        self.crop_ratio = CropRatio::new(numerator, denominator);
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_exposure_gain(mut self, exposure: i32, gain: i32) -> Self {
        self.exposure = exposure;
        self.gain = gain;
        self
    }

    /// 同时更新 bpp，保持两者一致
    pub fn with_color_scheme(mut self, scheme: ColorScheme) -> Self {
        self.color_scheme = scheme;
        if let Some(bpp) = scheme.bits_per_pixel() {
            self.bits_per_pixel = bpp;
        }
        self
    }

    pub fn with_frames(mut self, dir: impl Into<PathBuf>, count: u32) -> Self {
        self.frames_dir = dir.into();
        self.frame_count = count;
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}

bitflags! {
    /// 一次 ModifyDevice 触及的关注点，设备据此决定重建哪些状态
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct SpecChanges: u32 {
        /// 原始/输出分辨率或裁剪比例
        const GEOMETRY     = 1 << 0;
        /// bpp 或色彩方案
        const FORMAT       = 1 << 1;
        /// 帧率
        const TIMING       = 1 << 2;
        /// 曝光/增益
        const TONE         = 1 << 3;
        /// 帧目录或帧数
        const FRAME_SOURCE = 1 << 4;
        /// 循环标志或帧索引
        const PLAYBACK     = 1 << 5;

        /// 需要重新协商输出格式
        const RENEGOTIATE = Self::GEOMETRY.bits() | Self::FORMAT.bits();
        /// 需要重建帧源 (帧大小依赖原始分辨率和 bpp)
        const REBUILD_SOURCE = Self::GEOMETRY.bits() | Self::FORMAT.bits() | Self::FRAME_SOURCE.bits();
    }
}

/// ModifyDevice 的部分更新：`None` 表示保持不变
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(
    feature = "serialize",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct DeviceSpecPatch {
    pub origin: Option<Resolution>,
    pub resolution: Option<Resolution>,
    pub crop_ratio: Option<CropRatio>,
    pub fps: Option<u32>,
    pub exposure: Option<i32>,
    pub gain: Option<i32>,
    pub bits_per_pixel: Option<u32>,
    pub color_scheme: Option<ColorScheme>,
    pub frames_dir: Option<PathBuf>,
    pub frame_count: Option<u32>,
    pub looping: Option<bool>,
    pub frame_index: Option<u32>,
}

impl DeviceSpecPatch {
    /// 把线协议的 "未设置" 哨兵值转换为 `None`：
    /// 负的曝光/增益、0 fps、0 bpp、0 尺寸、0 裁剪分量、空目录、Unset 色彩方案。
    /// 循环标志总是被写入。
    pub fn from_sentinels(spec: &DeviceSpec) -> Self {
        let res = |w: u32, h: u32| (w != 0 && h != 0).then_some(Resolution::new(w, h));
        Self {
            origin: res(spec.orig_width, spec.orig_height),
            resolution: res(spec.width, spec.height),
            crop_ratio: (spec.crop_ratio.numerator != 0 && spec.crop_ratio.denominator != 0)
                .then_some(spec.crop_ratio),
            fps: (spec.fps > 0).then_some(spec.fps),
            exposure: (spec.exposure >= 0).then_some(spec.exposure),
            gain: (spec.gain >= 0).then_some(spec.gain),
            bits_per_pixel: (spec.bits_per_pixel > 0).then_some(spec.bits_per_pixel),
            color_scheme: spec.color_scheme.is_set().then_some(spec.color_scheme),
            frames_dir: (!spec.frames_dir.as_os_str().is_empty()).then(|| spec.frames_dir.clone()),
            frame_count: (spec.frame_count > 0).then_some(spec.frame_count),
            looping: Some(spec.looping),
            frame_index: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes().is_empty()
    }

    /// 只检查补丁里给出的字段
    pub fn validate(&self) -> Result<()> {
        if let Some(fps) = self.fps {
            check_fps(fps)?;
        }
        if let Some(e) = self.exposure {
            check_tone("exposure", e, EXPOSURE_MAX)?;
        }
        if let Some(g) = self.gain {
            check_tone("gain", g, GAIN_MAX)?;
        }
        if let Some(crop) = self.crop_ratio {
            crop.validate()?;
        }
        Ok(())
    }

    pub fn changes(&self) -> SpecChanges {
        let mut c = SpecChanges::empty();
        if self.origin.is_some() || self.resolution.is_some() || self.crop_ratio.is_some() {
            c |= SpecChanges::GEOMETRY;
        }
        if self.bits_per_pixel.is_some() || self.color_scheme.is_some() {
            c |= SpecChanges::FORMAT;
        }
        if self.fps.is_some() {
            c |= SpecChanges::TIMING;
        }
        if self.exposure.is_some() || self.gain.is_some() {
            c |= SpecChanges::TONE;
        }
        if self.frames_dir.is_some() || self.frame_count.is_some() {
            c |= SpecChanges::FRAME_SOURCE;
        }
        if self.looping.is_some() || self.frame_index.is_some() {
            c |= SpecChanges::PLAYBACK;
        }
        c
    }

    /// 把补丁合并进一份规格 (纯函数，不做协商)。
    ///
    /// bpp 与色彩方案互相推导；两者同时给出时色彩方案优先。
    pub fn apply_to(&self, spec: &mut DeviceSpec) {
        if let Some(o) = self.origin {
            spec.orig_width = o.width;
            spec.orig_height = o.height;
        }
        if let Some(r) = self.resolution {
            spec.width = r.width;
            spec.height = r.height;
        }
        if let Some(c) = self.crop_ratio {
            spec.crop_ratio = c;
        }
        if let Some(fps) = self.fps {
            spec.fps = fps;
        }
        if let Some(e) = self.exposure {
            spec.exposure = e;
        }
        if let Some(g) = self.gain {
            spec.gain = g;
        }
        if let Some(bpp) = self.bits_per_pixel {
            spec.bits_per_pixel = bpp;
            let scheme = ColorScheme::from_bits_per_pixel(bpp);
            if scheme.is_set() {
                spec.color_scheme = scheme;
            }
        }
        if let Some(scheme) = self.color_scheme {
            spec.color_scheme = scheme;
            if let Some(bpp) = scheme.bits_per_pixel() {
                spec.bits_per_pixel = bpp;
            }
        }
        if let Some(dir) = &self.frames_dir {
            spec.frames_dir = dir.clone();
        }
        if let Some(n) = self.frame_count {
            spec.frame_count = n;
        }
        if let Some(l) = self.looping {
            spec.looping = l;
        }
        if let Some(i) = self.frame_index {
            spec.frame_index = i;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_mean_unchanged() {
        let wire = DeviceSpec {
            orig_width: 0,
            orig_height: 0,
            width: 0,
            height: 0,
            crop_ratio: CropRatio::new(0, 0),
            fps: 0,
            exposure: -1,
            gain: -1,
            bits_per_pixel: 0,
            color_scheme: ColorScheme::Unset,
            looping: false,
            ..DeviceSpec::default()
        };
        let patch = DeviceSpecPatch::from_sentinels(&wire);
        assert_eq!(patch.changes(), SpecChanges::PLAYBACK);
        assert_eq!(patch.looping, Some(false));
    }

    #[test]
    fn scheme_wins_over_bpp() {
        let mut spec = DeviceSpec::default();
        let patch = DeviceSpecPatch {
            bits_per_pixel: Some(8),
            color_scheme: Some(ColorScheme::Rgb24),
            ..Default::default()
        };
        patch.apply_to(&mut spec);
        assert_eq!(spec.color_scheme, ColorScheme::Rgb24);
        assert_eq!(spec.bits_per_pixel, 24);
        assert!(patch.changes().contains(SpecChanges::FORMAT));
        assert!(patch.changes().intersects(SpecChanges::REBUILD_SOURCE));
    }

    #[test]
    fn tone_only_patch_does_not_rebuild() {
        let patch = DeviceSpecPatch {
            exposure: Some(150),
            ..Default::default()
        };
        assert!(!patch.changes().intersects(SpecChanges::REBUILD_SOURCE));
        let mut spec = DeviceSpec::default();
        patch.apply_to(&mut spec);
        assert_eq!(spec.exposure, 150);
        assert_eq!(spec.gain, GAIN_BASELINE);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(DeviceSpec::default().validate().is_ok());
        assert!(DeviceSpec::default().with_fps(FPS_MAX).validate().is_ok());
        assert!(DeviceSpec::default().with_fps(5_000_000).validate().is_err());
        assert!(DeviceSpec::default()
            .with_exposure_gain(100_000_000, 50)
            .validate()
            .is_err());
        assert!(DeviceSpec::default().with_exposure_gain(100, -3).validate().is_err());
        assert!(DeviceSpec::default().with_crop(0, 4).validate().is_err());

        let patch = DeviceSpecPatch {
            gain: Some(GAIN_MAX + 1),
            ..Default::default()
        };
        assert!(matches!(patch.validate(), Err(VcamError::InvalidArgument(_))));
        let patch = DeviceSpecPatch {
            exposure: Some(EXPOSURE_MAX),
            fps: Some(60),
            ..Default::default()
        };
        assert!(patch.validate().is_ok());
    }
}
