use crate::frame::Timestamp;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

// 进程内单调时钟的锚点
// OnceLock 保证它只会被初始化一次，且是线程安全的。
static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// 每帧时长 (V4L2 timeperframe 语义)：`numerator / denominator` 秒。
///
/// 分母为 0 表示 "从未设置"，此时使用 [`FrameInterval::DEFAULT`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameInterval {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameInterval {
    /// 29.97 fps
    pub const DEFAULT: Self = Self {
        numerator: 1001,
        denominator: 30000,
    };

    pub const UNSET: Self = Self {
        numerator: 0,
        denominator: 0,
    };

    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// 控制面的整数帧率；0 表示未设置
    pub fn from_fps(fps: u32) -> Self {
        if fps == 0 {
            return Self::UNSET;
        }
        Self::new(1, fps)
    }

    /// 微秒精度；用于 "1 / 实际耗时" 的降速
    pub fn from_duration(d: Duration) -> Self {
        let us = d.as_micros().clamp(1, u32::MAX as u128) as u32;
        Self::new(us, 1_000_000)
    }

    pub fn is_set(&self) -> bool {
        self.numerator != 0 && self.denominator != 0
    }

    /// 未设置时返回默认值
    pub fn or_default(self) -> Self {
        if self.is_set() {
            self
        } else {
            Self::DEFAULT
        }
    }

    pub fn duration(&self) -> Duration {
        let iv = self.or_default();
        Duration::from_nanos(iv.numerator as u64 * 1_000_000_000 / iv.denominator as u64)
    }

    pub fn fps(&self) -> f64 {
        let iv = self.or_default();
        iv.denominator as f64 / iv.numerator as f64
    }

    /// GetDevice 返回的整数帧率
    pub fn fps_rounded(&self) -> u32 {
        self.fps().round() as u32
    }
}

impl Default for FrameInterval {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// 自适应节拍控制器的决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// 本帧按时完成，睡眠剩余时间
    Sleep(Duration),
    /// 计算超时：对外公布的帧间隔改为实际耗时，立即进入下一帧
    Overrun { interval: FrameInterval },
}

/// 纯函数：给定本帧耗时和目标帧间隔，决定睡眠还是降速。
///
/// 生产线程从不累积欠账，超时后只是报告更低的有效帧率。
pub fn pace(elapsed: Duration, interval: FrameInterval) -> Pace {
    let target = interval.duration();
    if elapsed > target {
        Pace::Overrun {
            interval: FrameInterval::from_duration(elapsed),
        }
    } else {
        Pace::Sleep(target - elapsed)
    }
}

/// 相对进程锚点的单调时间 (纳秒)
pub fn monotonic_ns() -> u64 {
    let start = PROCESS_START.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

/// 给完成的 buffer 打时间戳
pub fn now_timestamp() -> Timestamp {
    let ns = monotonic_ns();
    Timestamp {
        hw_raw_ns: ns,
        system_synced: Duration::from_nanos(ns),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_interval_is_ntsc() {
        let iv = FrameInterval::UNSET;
        assert!(!iv.is_set());
        assert_eq!(iv.fps_rounded(), 30);
        assert_eq!(iv.duration(), Duration::from_nanos(33_366_666));
    }

    #[test]
    fn fps_round_trips_through_interval() {
        for fps in [1, 15, 24, 30, 60, 120] {
            assert_eq!(FrameInterval::from_fps(fps).fps_rounded(), fps);
        }
        assert_eq!(FrameInterval::from_fps(0), FrameInterval::UNSET);
    }

    #[test]
    fn huge_fps_does_not_overflow() {
        let iv = FrameInterval::from_fps(5_000_000);
        assert_eq!(iv.fps_rounded(), 5_000_000);
        assert_eq!(iv.duration(), Duration::from_nanos(200));
        let iv = FrameInterval::from_fps(u32::MAX);
        assert!(iv.is_set());
        assert_eq!(iv.duration(), Duration::ZERO);
    }

    #[test]
    fn pace_sleeps_the_remainder() {
        let iv = FrameInterval::from_fps(50); // 20ms
        assert_eq!(
            pace(Duration::from_millis(5), iv),
            Pace::Sleep(Duration::from_millis(15))
        );
        assert_eq!(pace(Duration::from_millis(20), iv), Pace::Sleep(Duration::ZERO));
    }

    #[test]
    fn pace_throttles_on_overrun() {
        let iv = FrameInterval::from_fps(50);
        match pace(Duration::from_millis(40), iv) {
            Pace::Overrun { interval } => {
                assert_eq!(interval.fps_rounded(), 25);
                assert_eq!(interval.duration(), Duration::from_millis(40));
            }
            other => panic!("expected overrun, got {other:?}"),
        }
    }

    #[test]
    fn timestamps_are_monotonic() {
        let a = now_timestamp();
        let b = now_timestamp();
        assert!(b.hw_raw_ns >= a.hw_raw_ns);
    }
}
