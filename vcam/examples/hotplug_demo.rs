// vcam/examples/hotplug_demo.rs

use anyhow::Result;
use std::time::Duration;
use vcam::prelude::*;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // 1. 控制面，启动时不创建任何设备
    let control = ControlDevice::new(RegistryConfig::new().create_devices(0))?;

    // 2. "插入" 一个 640x480 的摄像头，从 1280x960 的原始画面中心裁剪
    let spec = DeviceSpec::default()
        .with_origin(1280, 960)
        .with_resolution(640, 480)
        .with_crop(1, 2)
        .with_fps(30);
    let index = control.create_device(spec)?;
    println!("Plugged in {}", control.get_device(index)?.video_node);

    let mut cap = VideoCapture::open(&control, index)?;
    let mut frame = Mat::empty();
    let mut tm = TickMeter::new();

    println!("Start capturing...");
    for i in 0..90 {
        tm.start();
        if !cap.read(&mut frame)? {
            println!("Stream ended");
            break;
        }
        tm.stop();

        // 运行中切换格式，下一帧就是新格式
        if i == 30 {
            let fmt = cap.set_format(FourCC::YUYV)?;
            println!("Switched to {}", fmt.fourcc());
        }
        if i == 60 {
            control.modify_device(
                index,
                &DeviceSpecPatch {
                    exposure: Some(180),
                    ..Default::default()
                },
            )?;
            println!("Exposure raised to 180");
        }
        if i % 30 == 29 {
            println!(
                "{:>3} frames  {}x{}x{}  {:.1} fps",
                tm.get_counter(),
                frame.cols,
                frame.rows,
                frame.channels,
                tm.get_fps()
            );
        }
    }

    // 3. 保存最后一帧
    if !frame.is_empty() {
        imwrite("hotplug_demo.png", &frame)?;
    }

    // 4. "拔出"：读者只在拷贝期间持有 buffer，Busy 时稍后重试
    cap.release();
    loop {
        match control.destroy_device(index) {
            Err(VcamError::Busy { outstanding }) => {
                println!("Device busy ({} buffers), retrying", outstanding);
                std::thread::sleep(Duration::from_millis(10));
            }
            other => break other?,
        }
    }
    println!("Unplugged, {} devices left", control.len());
    Ok(())
}
