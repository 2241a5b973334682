//! 像素流水线：居中放置 + 曝光/增益
//!
//! 两个阶段都是纯函数，只依赖传入的格式，方便单独测试。

use vcam_core::format::OutputFormat;
use vcam_core::pixel_format::PixelLayout;
use vcam_core::spec::{EXPOSURE_BASELINE, GAIN_BASELINE};

/// 一次放置的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaceReport {
    pub rows_copied: u32,
    /// 越界而被放弃的行 (该行保持清零)
    pub rows_aborted: u32,
}

/// 把原始尺寸的源帧居中裁剪进目标 buffer。
///
/// * 源帧紧密排列，行宽 = `src_fmt.width * bpp`；
/// * 目标行宽使用 `dst_fmt.bytes_per_line`，行尾 padding 清零；
/// * 源或目标越界的行单独放弃，不影响其他行。
pub fn place(
    src: &[u8],
    src_fmt: &OutputFormat,
    dst: &mut [u8],
    dst_fmt: &OutputFormat,
) -> PlaceReport {
    let bpp = dst_fmt.layout().bytes_per_pixel() as usize;
    let src_stride = src_fmt.width() as usize * bpp;
    let dst_stride = dst_fmt.bytes_per_line() as usize;

    let mut start_x = src_fmt.width().saturating_sub(dst_fmt.width()) as usize / 2;
    // YUYV 以两个像素为一组，起点必须对齐到宏像素
    if dst_fmt.layout() == PixelLayout::Yuyv {
        start_x &= !1;
    }
    let start_y = src_fmt.height().saturating_sub(dst_fmt.height()) as usize / 2;

    let copy_px = (dst_fmt.width() as usize).min((src_fmt.width() as usize).saturating_sub(start_x));
    let copy_bytes = copy_px * bpp;

    let mut report = PlaceReport::default();

    for row in 0..dst_fmt.height() as usize {
        let dst_off = row * dst_stride;
        let Some(line) = dst.get_mut(dst_off..dst_off + dst_stride) else {
            report.rows_aborted += 1;
            continue;
        };

        let src_row = start_y + row;
        let src_off = src_row * src_stride + start_x * bpp;
        match src.get(src_off..src_off + copy_bytes) {
            Some(pixels) if src_row < src_fmt.height() as usize => {
                line[..copy_bytes].copy_from_slice(pixels);
                line[copy_bytes..].fill(0);
                report.rows_copied += 1;
            }
            _ => {
                line.fill(0);
                report.rows_aborted += 1;
            }
        }
    }

    if report.rows_aborted > 0 {
        tracing::warn!(
            target: "vcam::pipeline",
            "Aborted {} of {} rows while placing {}x{} frame into {}x{} buffer ({} bytes)",
            report.rows_aborted,
            dst_fmt.height(),
            src_fmt.width(),
            src_fmt.height(),
            dst_fmt.width(),
            dst_fmt.height(),
            dst.len()
        );
    }
    report
}

/// 亮度通道的查找表：`t = v * e / 100; v' = clamp(t + t * (g - 50) / 100)`
fn tone_table(exposure: i32, gain: i32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    let (exposure, gain) = (exposure as i64, gain as i64);
    for (v, out) in lut.iter_mut().enumerate() {
        let t = v as i64 * exposure / 100;
        let boosted = t.saturating_add(t.saturating_mul(gain - GAIN_BASELINE as i64) / 100);
        *out = boosted.clamp(0, 255) as u8;
    }
    lut
}

/// 色度通道只受增益影响，围绕 128 缩放；gain = 50 时恒等
fn chroma_table(gain: i32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (c, out) in lut.iter_mut().enumerate() {
        let centered = c as i64 - 128;
        *out = (128 + centered * (gain as i64 + GAIN_BASELINE as i64) / 100).clamp(0, 255) as u8;
    }
    lut
}

/// 就地调整每个像素的曝光和增益。基准值 (100, 50) 时直接返回。
pub fn apply_exposure_gain(buffer: &mut [u8], format: &OutputFormat, exposure: i32, gain: i32) {
    if exposure == EXPOSURE_BASELINE && gain == GAIN_BASELINE {
        return;
    }

    let stride = format.bytes_per_line() as usize;
    let row_bytes = format.row_bytes();
    if stride == 0 {
        return;
    }
    let luma = tone_table(exposure, gain);

    match format.layout() {
        PixelLayout::Rgb24 | PixelLayout::Grey => {
            for line in buffer.chunks_mut(stride).take(format.height() as usize) {
                let used = row_bytes.min(line.len());
                for v in &mut line[..used] {
                    *v = luma[*v as usize];
                }
            }
        }
        PixelLayout::Yuyv => {
            let chroma = chroma_table(gain);
            for line in buffer.chunks_mut(stride).take(format.height() as usize) {
                let used = row_bytes.min(line.len());
                // 偶数字节是 Y，奇数字节是 U/V
                for pair in line[..used].chunks_mut(2) {
                    pair[0] = luma[pair[0] as usize];
                    if let Some(c) = pair.get_mut(1) {
                        *c = chroma[*c as usize];
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grey(w: u32, h: u32) -> OutputFormat {
        OutputFormat::new(w, h, PixelLayout::Grey)
    }

    #[test]
    fn place_centers_the_crop() {
        // 4x4 源，每个像素值 = 行 * 10 + 列
        let src: Vec<u8> = (0..4u8).flat_map(|r| (0..4u8).map(move |c| r * 10 + c)).collect();
        let mut dst = vec![0xFF; 4];
        let report = place(&src, &grey(4, 4), &mut dst, &grey(2, 2));
        assert_eq!(report, PlaceReport { rows_copied: 2, rows_aborted: 0 });
        assert_eq!(dst, vec![11, 12, 21, 22]);
    }

    #[test]
    fn place_pads_when_output_is_wider() {
        let src = vec![7u8; 2 * 2];
        let mut dst = vec![0xFF; 3 * 2];
        place(&src, &grey(2, 2), &mut dst, &grey(3, 2));
        assert_eq!(dst, vec![7, 7, 0, 7, 7, 0]);
    }

    #[test]
    fn short_source_aborts_rows_only() {
        // 源只有 1.5 行
        let src = vec![9u8; 6];
        let mut dst = vec![0xFF; 8];
        let report = place(&src, &grey(4, 2), &mut dst, &grey(4, 2));
        assert_eq!(report.rows_copied, 1);
        assert_eq!(report.rows_aborted, 1);
        assert_eq!(dst, vec![9, 9, 9, 9, 0, 0, 0, 0]);
    }

    #[test]
    fn small_destination_aborts_overflowing_rows() {
        let src = vec![1u8; 16];
        let mut dst = vec![0u8; 6];
        let report = place(&src, &grey(4, 4), &mut dst, &grey(4, 4));
        assert_eq!(report.rows_copied, 1);
        assert_eq!(report.rows_aborted, 3);
    }

    #[test]
    fn yuyv_crop_stays_on_macro_pixel_boundary() {
        let fmt_src = OutputFormat::new(6, 1, PixelLayout::Yuyv);
        let fmt_dst = OutputFormat::new(4, 1, PixelLayout::Yuyv);
        let src: Vec<u8> = (0..12).collect();
        let mut dst = vec![0u8; 8];
        place(&src, &fmt_src, &mut dst, &fmt_dst);
        // start_x = 1 会被下取整到 0
        assert_eq!(dst, (0..8).collect::<Vec<u8>>());
    }

    #[test]
    fn baseline_tone_is_identity() {
        let fmt = grey(16, 16);
        let mut buf: Vec<u8> = (0..=255).collect();
        apply_exposure_gain(&mut buf, &fmt, 100, 50);
        assert_eq!(buf, (0..=255).collect::<Vec<u8>>());
        assert_eq!(tone_table(100, 50), {
            let mut id = [0u8; 256];
            id.iter_mut().enumerate().for_each(|(i, v)| *v = i as u8);
            id
        });
    }

    #[test]
    fn tone_formula_and_clamping() {
        let fmt = grey(3, 1);
        let mut buf = vec![100, 200, 0];
        apply_exposure_gain(&mut buf, &fmt, 150, 50);
        assert_eq!(buf, vec![150, 255, 0]);

        let mut buf = vec![100, 200, 10];
        apply_exposure_gain(&mut buf, &fmt, 100, 0);
        assert_eq!(buf, vec![50, 100, 5]);

        let mut buf = vec![100];
        apply_exposure_gain(&mut buf, &grey(1, 1), 0, 100);
        assert_eq!(buf, vec![0]);
    }

    #[test]
    fn yuyv_chroma_gets_gain_only() {
        let fmt = OutputFormat::new(2, 1, PixelLayout::Yuyv);
        let mut buf = vec![100, 128, 100, 200];
        apply_exposure_gain(&mut buf, &fmt, 200, 50);
        // 曝光只作用于亮度
        assert_eq!(buf, vec![200, 128, 200, 200]);

        let mut buf = vec![100, 28, 100, 228];
        apply_exposure_gain(&mut buf, &fmt, 100, 0);
        assert_eq!(buf, vec![50, 78, 50, 178]);
    }

    #[test]
    fn extreme_tone_settings_saturate() {
        let fmt = grey(3, 1);
        let mut buf = vec![0, 1, 200];
        apply_exposure_gain(&mut buf, &fmt, 100_000_000, 50);
        assert_eq!(buf, vec![0, 255, 255]);

        let mut buf = vec![0, 1, 200];
        apply_exposure_gain(&mut buf, &fmt, i32::MAX, i32::MAX);
        assert_eq!(buf, vec![0, 255, 255]);

        let mut buf = vec![0, 1, 200];
        apply_exposure_gain(&mut buf, &fmt, -1_000, 50);
        assert_eq!(buf, vec![0, 0, 0]);

        let yuyv = OutputFormat::new(2, 1, PixelLayout::Yuyv);
        let mut buf = vec![10, 0, 10, 255];
        apply_exposure_gain(&mut buf, &yuyv, 100, i32::MAX);
        assert_eq!(buf, vec![255, 0, 255, 255]);
    }

    #[test]
    fn padded_rows_are_zeroed_by_place_and_left_alone_by_tone() {
        // 2x2 RGB，每行 8 字节 (2 字节 padding)
        let src_fmt = OutputFormat::new(2, 2, PixelLayout::Rgb24);
        let dst_fmt = OutputFormat::padded(2, 2, PixelLayout::Rgb24, 8).unwrap();
        let src: Vec<u8> = (1..=12).collect();
        let mut dst = vec![0xEE; dst_fmt.image_size() as usize];

        let report = place(&src, &src_fmt, &mut dst, &dst_fmt);
        assert_eq!(report.rows_copied, 2);
        assert_eq!(dst, vec![1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12, 0, 0]);

        dst[6] = 0x77;
        dst[15] = 0x77;
        apply_exposure_gain(&mut dst, &dst_fmt, 200, 50);
        assert_eq!(dst, vec![2, 4, 6, 8, 10, 12, 0x77, 0, 14, 16, 18, 20, 22, 24, 0, 0x77]);
    }
}
