use crate::core::mat::Mat;
use anyhow::{anyhow, Result};
use std::path::Path;

/// 保存图像文件
///
/// 根据文件扩展名自动决定格式 (PNG / JPEG / BMP ...)。
/// 支持 1 通道灰度和 3 通道 BGR。
pub fn imwrite<P: AsRef<Path>>(path: P, mat: &Mat) -> Result<()> {
    if mat.is_empty() {
        return Err(anyhow!("Refusing to save an empty Mat"));
    }

    let (data, color) = match mat.channels {
        1 => {
            let mut grey = Vec::with_capacity((mat.rows * mat.cols) as usize);
            for r in 0..mat.rows {
                grey.extend_from_slice(mat.row_bytes(r));
            }
            (grey, image::ColorType::L8)
        }
        3 => {
            // BGR -> RGB，image crate 需要 RGB
            let mut rgb = Vec::with_capacity((mat.rows * mat.cols) as usize * 3);
            for r in 0..mat.rows {
                for px in mat.row_bytes(r).chunks_exact(3) {
                    rgb.extend_from_slice(&[px[2], px[1], px[0]]);
                }
            }
            (rgb, image::ColorType::Rgb8)
        }
        n => return Err(anyhow!("Cannot save {}-channel images", n)),
    };

    image::save_buffer(path, &data, mat.cols as u32, mat.rows as u32, color)
        .map_err(|e| anyhow!("Failed to save image: {}", e))?;

    Ok(())
}
