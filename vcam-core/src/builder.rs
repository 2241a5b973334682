use crate::spec::DeviceSpec;

/// 控制面配置 (对应内核模块参数)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialize",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct RegistryConfig {
    pub devices_max: usize,
    pub create_devices: usize, // 启动时创建的默认设备数
    pub buffer_count: usize,   // 每个设备的 buffer 数量，最少 2
    pub frame_loading: FrameLoading,
    pub node_prefix: String, // 设备节点名前缀，如 "/dev/video"
    pub default_spec: DeviceSpec,
}

/// 帧目录的加载方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum FrameLoading {
    /// 创建/修改时一次性读入连续内存 (arena)
    #[default]
    Preload,
    /// 每个 tick 从磁盘读取一帧
    OnDemand,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryConfig {
    pub const MIN_BUFFERS: usize = 2;

    pub fn new() -> Self {
        Self {
            devices_max: 8,
            create_devices: 1,
            buffer_count: 3,
            frame_loading: FrameLoading::Preload,
            node_prefix: "/dev/video".to_string(),
            default_spec: DeviceSpec::default(),
        }
    }

    /// 设置最大设备数
    pub fn devices_max(mut self, max: usize) -> Self {
        self.devices_max = max;
        self
    }

    /// 启动时自动创建的设备数
    pub fn create_devices(mut self, count: usize) -> Self {
        self.create_devices = count;
        self
    }

    /// 设置缓冲区数量 (默认 3，不足 2 时按 2 处理)
    pub fn buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count;
        self
    }

    pub fn frame_loading(mut self, mode: FrameLoading) -> Self {
        self.frame_loading = mode;
        self
    }

    pub fn node_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.node_prefix = prefix.into();
        self
    }

    /// 默认设备规格 (create_devices 和缺省字段使用)
    pub fn default_spec(mut self, spec: DeviceSpec) -> Self {
        self.default_spec = spec;
        self
    }

    pub fn effective_buffer_count(&self) -> usize {
        self.buffer_count.max(Self::MIN_BUFFERS)
    }

    /// 从 JSON 文件加载，缺失字段取默认值
    #[cfg(feature = "serialize")]
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| crate::error::VcamError::InvalidArgument(format!("bad config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let cfg = RegistryConfig::new()
            .devices_max(2)
            .create_devices(0)
            .buffer_count(1)
            .frame_loading(FrameLoading::OnDemand);
        assert_eq!(cfg.devices_max, 2);
        assert_eq!(cfg.effective_buffer_count(), 2);
        assert_eq!(cfg.frame_loading, FrameLoading::OnDemand);
    }

    #[cfg(feature = "serialize")]
    #[test]
    fn partial_json_fills_defaults() {
        let cfg: RegistryConfig =
            serde_json::from_str(r#"{ "devices_max": 4, "frame_loading": "OnDemand" }"#).unwrap();
        assert_eq!(cfg.devices_max, 4);
        assert_eq!(cfg.create_devices, 1);
        assert_eq!(cfg.frame_loading, FrameLoading::OnDemand);
        assert_eq!(cfg.default_spec, DeviceSpec::default());
    }
}
