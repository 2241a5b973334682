use std::time::{Duration, Instant};

/// 复刻 OpenCV C++ 的 cv::TickMeter 类
/// 用于测量消费端实际拿到的帧率，和设备公布的帧率对照
#[derive(Debug, Clone)]
pub struct TickMeter {
    start_time: Option<Instant>, // 按下秒表的时刻
    total_time: Duration,        // 累计走过的时间
    counter: u64,                // 计次（比如统计了多少帧）
}

impl Default for TickMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl TickMeter {
    pub fn new() -> Self {
        Self {
            start_time: None,
            total_time: Duration::ZERO,
            counter: 0,
        }
    }

    /// 开始计时；已经在计时则忽略
    pub fn start(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Instant::now());
        }
    }

    /// 停止后，时间会累积到 total_time 中，且计数器 +1
    pub fn stop(&mut self) {
        if let Some(start) = self.start_time.take() {
            self.total_time += start.elapsed();
            self.counter += 1;
        }
    }

    pub fn reset(&mut self) {
        self.start_time = None;
        self.total_time = Duration::ZERO;
        self.counter = 0;
    }

    /// 次数 / 总耗时
    pub fn get_fps(&self) -> f64 {
        let secs = self.total_time.as_secs_f64();
        if secs > 0.0 {
            self.counter as f64 / secs
        } else {
            0.0
        }
    }

    pub fn get_time_sec(&self) -> f64 {
        self.total_time.as_secs_f64()
    }

    pub fn get_counter(&self) -> u64 {
        self.counter
    }
}
