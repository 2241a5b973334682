use std::sync::Arc;

use crate::core::mat::Mat;
use crate::internal::runtime;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use vcam_core::error::VcamError;
use vcam_core::format::OutputFormat;
use vcam_core::pixel_format::FourCC;
use vcam_core::time::FrameInterval;
use vcam_core::traits::Stream;
use vcam_sim::{ControlDevice, VirtualDevice};

/// 指令：主线程发送给后台 Worker 的命令
enum Command {
    /// 请求下一帧
    NextFrame,
    /// 停流并退出
    Stop,
}

/// 响应：后台 Worker 发回的数据
enum Response {
    /// 已经转换好的一帧
    Frame(Mat),
    Error(String),
    /// 设备被拔出
    EndOfStream,
}

/// 经典的 OpenCV 风格视频捕获类，读取一个虚拟设备
///
/// 后台任务拿到 buffer 后立即拷贝进 `Mat` 并归还给生产线程，
/// 所以消费端从不长期占用 buffer，设备随时可以被销毁。
pub struct VideoCapture {
    // 发送指令的通道
    cmd_tx: Sender<Command>,
    // 接收数据的通道
    res_rx: Receiver<Response>,
    device: Arc<VirtualDevice>,
    width: i32,
    height: i32,
    format: Option<FourCC>,
    is_opened: bool,
}

impl VideoCapture {
    /// 打开控制面上索引为 `index` 的设备 (0 起)
    pub fn open(control: &ControlDevice, index: usize) -> Result<Self> {
        let device = control
            .device(index)
            .with_context(|| format!("Camera index {} out of range", index))?;
        Self::from_device(device)
    }

    pub fn from_device(device: Arc<VirtualDevice>) -> Result<Self> {
        // 在主线程打开 Stream，随后 move 到后台任务
        let mut stream = device
            .open_stream()
            .map_err(|e| anyhow!("Failed to open {}: {}", device.id(), e))?;

        // 容量为 1，保证背压
        let (cmd_tx, cmd_rx) = bounded::<Command>(1);
        let (res_tx, res_rx) = bounded::<Response>(1);

        let rt = runtime::get_runtime().context("Failed to create vcam background runtime")?;
        let id = device.id();
        rt.spawn(async move {
            if let Err(e) = stream.start().await {
                let _ = res_tx.send(Response::Error(format!("Stream start failed: {}", e)));
                return;
            }
            log::debug!("{}: reader attached", id);

            // 等待指令会阻塞，交给 block_in_place，避免占住 worker
            while let Ok(cmd) = tokio::task::block_in_place(|| cmd_rx.recv()) {
                match cmd {
                    Command::NextFrame => {
                        let response = match stream.next_frame().await {
                            Ok(buffer) => {
                                // 拷贝出 Mat 之后立即归还 buffer
                                let converted = match buffer.as_frame() {
                                    Some(frame) => Mat::from_frame(&frame)
                                        .map(Response::Frame)
                                        .unwrap_or_else(|e| Response::Error(e.to_string())),
                                    None => Response::Error("Buffer was never filled".into()),
                                };
                                if let Err(e) = stream.requeue(buffer) {
                                    log::warn!("{}: requeue failed: {}", id, e);
                                }
                                converted
                            }
                            Err(VcamError::Disconnected(_)) => Response::EndOfStream,
                            Err(e) => Response::Error(e.to_string()),
                        };
                        let end = matches!(response, Response::EndOfStream);
                        if res_tx.send(response).is_err() || end {
                            break;
                        }
                    }
                    Command::Stop => break,
                }
            }

            // 任务结束，停流
            let _ = stream.stop().await;
            log::debug!("{}: reader detached", id);
        });

        let fmt = device.output_format();
        Ok(Self {
            cmd_tx,
            res_rx,
            device,
            width: fmt.width() as i32,
            height: fmt.height() as i32,
            format: Some(fmt.fourcc()),
            is_opened: true,
        })
    }

    /// 核心 API：读取下一帧
    ///
    /// # 返回值
    /// * `Ok(true)` - 读取成功
    /// * `Ok(false)` - 设备已拔出 (流结束)
    /// * `Err(e)` - 其他错误
    pub fn read(&mut self, mat: &mut Mat) -> Result<bool> {
        if !self.is_opened {
            return Ok(false);
        }

        if self.cmd_tx.send(Command::NextFrame).is_err() {
            self.is_opened = false;
            return Err(anyhow!("Background worker is dead"));
        }

        // 阻塞等待结果 (同步 API 的本质)
        let response = self
            .res_rx
            .recv()
            .map_err(|_| anyhow!("Failed to receive response from worker"))?;

        match response {
            Response::Frame(frame) => {
                self.width = frame.cols;
                self.height = frame.rows;
                // 直接 move，旧的 Mat 数据被释放
                *mat = frame;
                Ok(true)
            }
            Response::Error(msg) => Err(anyhow!("Capture error: {}", msg)),
            Response::EndOfStream => {
                log::info!("{}: device unplugged", self.device.id());
                self.is_opened = false;
                Ok(false)
            }
        }
    }

    pub fn is_opened(&self) -> bool {
        self.is_opened
    }

    /// 最近一帧的宽度
    pub fn get_width(&self) -> i32 {
        self.width
    }

    pub fn get_height(&self) -> i32 {
        self.height
    }

    pub fn get_format(&self) -> Option<FourCC> {
        self.format
    }

    /// 设备当前公布的帧率 (降速后会变小)
    pub fn get_fps(&self) -> f64 {
        self.device.frame_interval().fps()
    }

    /// 设置目标帧率，返回实际生效的值
    pub fn set_fps(&mut self, fps: u32) -> f64 {
        self.device
            .set_frame_interval(FrameInterval::from_fps(fps))
            .fps()
    }

    /// 切换像素格式；不支持的 FourCC 保持原格式
    pub fn set_format(&mut self, fourcc: FourCC) -> Result<OutputFormat> {
        let fmt = self
            .device
            .set_pixel_format(fourcc)
            .map_err(|e| anyhow!("Failed to set format {}: {}", fourcc, e))?;
        self.format = Some(fmt.fourcc());
        Ok(fmt)
    }

    pub fn device(&self) -> &Arc<VirtualDevice> {
        &self.device
    }

    /// 显式释放；Drop 也会做同样的事
    pub fn release(&mut self) {
        if self.is_opened {
            let _ = self.cmd_tx.send(Command::Stop);
            self.is_opened = false;
        }
    }
}

// 析构函数：通知后台任务退出
impl Drop for VideoCapture {
    fn drop(&mut self) {
        // worker 可能已经退出了，忽略错误
        let _ = self.cmd_tx.try_send(Command::Stop);
    }
}
