use std::fmt;

/// 生产线程的运行统计
///
/// 计数器在生产线程内累加，控制面通过 `VirtualDevice::telemetry` 定期取快照。
#[derive(Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct ProducerTelemetry {
    /// 成功填充并交付的帧数
    pub frames_produced: u64,

    /// 队列为空、跳过填充的 tick 数 (消费端没有及时归还 buffer)
    pub empty_ticks: u64,

    /// 帧源读取失败、退化为合成帧的帧数
    pub fallback_frames: u64,

    /// 计算超过目标帧间隔、触发降速的次数
    pub overruns: u64,

    /// 放置像素时被放弃的行数
    pub aborted_rows: u64,

    /// 当前对外公布的帧率
    pub effective_fps: Option<f64>,
}

impl fmt::Debug for ProducerTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerTelemetry")
            .field("produced", &self.frames_produced)
            .field("empty", &self.empty_ticks)
            .field("fallback", &self.fallback_frames)
            .field("overruns", &self.overruns)
            .field("fps", &self.effective_fps.unwrap_or(0.0))
            .finish()
    }
}

/// 简单的状态指示灯
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceHealthStatus {
    Healthy,
    Warning(HealthIssue),
    Critical(HealthIssue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthIssue {
    /// 帧源持续读失败
    FrameSourceErrors,
    /// 跟不上目标帧率，已降速
    Throttled,
    /// 一直没有可填充的 buffer
    Starved,
}

impl ProducerTelemetry {
    /// 基于统计数据的健康评估
    pub fn assess_health(&self) -> DeviceHealthStatus {
        if self.fallback_frames > 0 {
            if self.fallback_frames * 2 > self.frames_produced {
                return DeviceHealthStatus::Critical(HealthIssue::FrameSourceErrors);
            }
            return DeviceHealthStatus::Warning(HealthIssue::FrameSourceErrors);
        }

        if self.overruns > 0 {
            return DeviceHealthStatus::Warning(HealthIssue::Throttled);
        }

        if self.frames_produced == 0 && self.empty_ticks > 30 {
            return DeviceHealthStatus::Warning(HealthIssue::Starved);
        }

        DeviceHealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_prefers_source_errors() {
        let t = ProducerTelemetry {
            frames_produced: 10,
            fallback_frames: 6,
            overruns: 3,
            ..Default::default()
        };
        assert_eq!(
            t.assess_health(),
            DeviceHealthStatus::Critical(HealthIssue::FrameSourceErrors)
        );

        let t = ProducerTelemetry {
            frames_produced: 10,
            overruns: 1,
            ..Default::default()
        };
        assert_eq!(
            t.assess_health(),
            DeviceHealthStatus::Warning(HealthIssue::Throttled)
        );
        assert_eq!(
            ProducerTelemetry::default().assess_health(),
            DeviceHealthStatus::Healthy
        );
    }
}
