//! vcamctl：创建、修改、移除、列出虚拟摄像头，并可以直接读流
//!
//! 命令行上的设备编号从 1 开始。

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vcam::prelude::*;
use vcam::vcam_sim::VirtualDevice;

#[derive(Parser, Debug)]
#[command(name = "vcamctl", version, about = "Control hot-pluggable virtual cameras")]
struct Cli {
    /// JSON 配置文件 (RegistryConfig)
    #[arg(long, env = "VCAM_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// 创建一个新设备
    #[arg(long, conflicts_with_all = ["modify", "remove"])]
    create: bool,

    /// 修改设备 IDX
    #[arg(long, value_name = "IDX", conflicts_with = "remove")]
    modify: Option<usize>,

    /// 移除设备 IDX
    #[arg(long, value_name = "IDX")]
    remove: Option<usize>,

    /// 列出所有设备
    #[arg(long)]
    list: bool,

    /// 输出分辨率，如 640x480
    #[arg(short = 'r', long, value_name = "WxH")]
    resolution: Option<Resolution>,

    /// 原始 (裁剪前) 分辨率
    #[arg(long, value_name = "WxH")]
    origin: Option<Resolution>,

    /// 裁剪比例，如 1/2
    #[arg(short = 'C', long = "crop", value_name = "N/D")]
    crop: Option<CropRatio>,

    #[arg(short = 'f', long)]
    fps: Option<u32>,

    #[arg(short = 'e', long)]
    exposure: Option<i32>,

    #[arg(short = 'g', long)]
    gain: Option<i32>,

    /// RGB | YUV | GRAY8
    #[arg(long, value_name = "SCHEME")]
    color_scheme: Option<ColorScheme>,

    #[arg(short = 'b', long = "bpp", value_name = "BITS")]
    bits_per_pixel: Option<u32>,

    /// 帧目录，包含 output_0001.raw ...
    #[arg(long, value_name = "DIR")]
    frames_dir: Option<PathBuf>,

    /// 帧数；省略时统计目录中的文件
    #[arg(long, value_name = "N")]
    frame_count: Option<u32>,

    /// 循环播放：0 或 1
    #[arg(short = 'L', long = "loop", value_name = "0|1", value_parser = parse_flag)]
    looping: Option<bool>,

    /// 读流 SECS 秒，报告实际帧率
    #[arg(long, value_name = "SECS")]
    stream: Option<f64>,

    /// 读流时把每一帧保存到 DIR (PNG)
    #[arg(long, value_name = "DIR", requires = "stream")]
    dump: Option<PathBuf>,

    /// 读流使用的设备；默认取刚创建/修改的设备，否则为 1
    #[arg(short = 'd', long, value_name = "IDX")]
    device: Option<usize>,
}

fn parse_flag(s: &str) -> Result<bool, String> {
    match s {
        "1" | "true" | "on" => Ok(true),
        "0" | "false" | "off" => Ok(false),
        _ => Err(format!("expected 0 or 1, got {s:?}")),
    }
}

impl Cli {
    fn patch(&self) -> DeviceSpecPatch {
        DeviceSpecPatch {
            origin: self.origin,
            resolution: self.resolution,
            crop_ratio: self.crop,
            fps: self.fps,
            exposure: self.exposure,
            gain: self.gain,
            bits_per_pixel: self.bits_per_pixel,
            color_scheme: self.color_scheme,
            frames_dir: self.frames_dir.clone(),
            frame_count: self.frame_count,
            looping: self.looping,
            frame_index: None,
        }
    }

    /// 创建请求：没给的字段使用 "未设置" 哨兵值，由控制面补默认值
    fn create_spec(&self) -> DeviceSpec {
        let mut spec = DeviceSpec {
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
            ..DeviceSpec::default()
        };
        self.patch().apply_to(&mut spec);
        spec
    }
}

/// 命令行编号 (1 起) → 注册表索引
fn to_index(idx: usize) -> Result<usize> {
    idx.checked_sub(1).context("Device numbers start at 1")
}

fn print_device(spec: &DeviceSpec, device: &VirtualDevice) {
    let source = if spec.frames_dir.as_os_str().is_empty() {
        "synthetic".to_string()
    } else {
        format!(
            "{} frames in {} ({})",
            spec.frame_count,
            spec.frames_dir.display(),
            device.source_kind()
        )
    };
    println!(
        "#{} {}  {}x{} {:?}  origin {}x{}  crop {}  {} fps  exposure {}  gain {}  loop {}  {}",
        spec.index + 1,
        spec.video_node,
        spec.width,
        spec.height,
        spec.color_scheme,
        spec.orig_width,
        spec.orig_height,
        spec.crop_ratio,
        spec.fps,
        spec.exposure,
        spec.gain,
        if spec.looping { "on" } else { "off" },
        source
    );
}

fn stream(control: &ControlDevice, index: usize, secs: f64, dump: Option<&PathBuf>) -> Result<()> {
    if let Some(dir) = dump {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create dump dir {}", dir.display()))?;
    }

    let mut cap = VideoCapture::open(control, index)?;
    let mut frame = Mat::empty();
    let mut tm = TickMeter::new();
    let deadline = Instant::now() + Duration::from_secs_f64(secs.max(0.0));

    while Instant::now() < deadline {
        tm.start();
        let ok = cap.read(&mut frame)?;
        tm.stop();
        if !ok {
            println!("Device unplugged, stream ended");
            break;
        }
        if let Some(dir) = dump {
            let path = dir.join(format!("frame_{:04}.png", tm.get_counter()));
            imwrite(&path, &frame)?;
        }
    }
    cap.release();

    let device = control.device(index)?;
    println!(
        "Read {} frames of {}x{} in {:.2}s: {:.2} fps (device reports {:.2}), health {:?}",
        tm.get_counter(),
        cap.get_width(),
        cap.get_height(),
        tm.get_time_sec(),
        tm.get_fps(),
        cap.get_fps(),
        device.health()
    );
    log::debug!("Stream finished: {:?}", device.telemetry());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RegistryConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RegistryConfig::new(),
    };
    let control = ControlDevice::new(config)?;

    let mut target = None;

    if cli.create {
        let index = control.create_device(cli.create_spec())?;
        println!("Created device #{}", index + 1);
        target = Some(index);
    } else if let Some(idx) = cli.modify {
        let index = to_index(idx)?;
        let patch = cli.patch();
        if patch.is_empty() {
            bail!("--modify needs at least one setting to change");
        }
        control.modify_device(index, &patch)?;
        println!("Modified device #{}", idx);
        target = Some(index);
    } else if let Some(idx) = cli.remove {
        control.destroy_device(to_index(idx)?)?;
        println!("Removed device #{}", idx);
    }

    if cli.list {
        for (i, spec) in control.list_devices()?.iter().enumerate() {
            print_device(spec, &*control.device(i)?);
        }
    }

    if let Some(secs) = cli.stream {
        let index = match cli.device {
            Some(idx) => to_index(idx)?,
            None => target.unwrap_or(0),
        };
        stream(&control, index, secs, cli.dump.as_ref())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_documented_flags() {
        let cli = Cli::try_parse_from([
            "vcamctl", "--create", "-r", "400x350", "--origin", "800x700", "-C", "1/2", "-f",
            "15", "-e", "120", "-g", "40", "--color-scheme", "GRAY8", "-L", "0",
        ])
        .unwrap();
        assert!(cli.create);
        let spec = cli.create_spec();
        assert_eq!(spec.resolution(), Resolution::new(400, 350));
        assert_eq!(spec.origin(), Resolution::new(800, 700));
        assert_eq!(spec.crop_ratio, CropRatio::new(1, 2));
        assert_eq!((spec.fps, spec.exposure, spec.gain), (15, 120, 40));
        assert_eq!(spec.color_scheme, ColorScheme::Grey8);
        assert!(!spec.looping);
    }

    #[test]
    fn unset_fields_stay_sentinels() {
        let cli = Cli::try_parse_from(["vcamctl", "--create"]).unwrap();
        let patch = DeviceSpecPatch::from_sentinels(&cli.create_spec());
        assert_eq!(patch.changes(), SpecChanges::PLAYBACK);
    }

    #[test]
    fn rejects_conflicting_actions_and_bad_values() {
        assert!(Cli::try_parse_from(["vcamctl", "--create", "--remove", "1"]).is_err());
        assert!(Cli::try_parse_from(["vcamctl", "-C", "3/2"]).is_err());
        assert!(Cli::try_parse_from(["vcamctl", "-L", "2"]).is_err());
        assert!(Cli::try_parse_from(["vcamctl", "--dump", "/tmp/x"]).is_err());
    }

    #[test]
    fn device_numbers_are_one_based() {
        assert_eq!(to_index(1).unwrap(), 0);
        assert!(to_index(0).is_err());
    }
}
