//! 控制面：热插拔、查询与重配置
//!
//! 注册表锁只用于簿记；设备构建 (可能读盘、分配大块内存) 和
//! 生产线程的 join 都在锁外完成。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use vcam_core::builder::RegistryConfig;
use vcam_core::error::{Result, VcamError};
use vcam_core::spec::{DeviceSpec, DeviceSpecPatch};
use vcam_core::traits::{ControlPlane, Stream};

use crate::device::{DeviceId, VirtualDevice};
use crate::registry::DeviceRegistry;

#[derive(Debug)]
pub struct ControlDevice {
    config: RegistryConfig,
    registry: DeviceRegistry,
    next_id: AtomicU64,
}

impl ControlDevice {
    /// 创建控制面，并按配置预先创建 `create_devices` 个默认设备
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let control = Self {
            registry: DeviceRegistry::new(config.devices_max),
            next_id: AtomicU64::new(0),
            config,
        };

        let initial = control.config.create_devices.min(control.config.devices_max);
        for _ in 0..initial {
            control.create_device(control.config.default_spec.clone())?;
        }

        tracing::info!(
            target: "vcam::control",
            "Control device ready: {} of {} devices",
            control.registry.len(),
            control.registry.capacity()
        );
        Ok(control)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn device(&self, index: usize) -> Result<Arc<VirtualDevice>> {
        self.registry.lookup(index)
    }

    pub fn index_of(&self, id: DeviceId) -> Option<usize> {
        self.registry.index_of(id)
    }

    /// 带当前索引的规格
    fn spec_at(index: usize, device: &VirtualDevice) -> DeviceSpec {
        let mut spec = device.spec();
        spec.index = index;
        spec
    }
}

impl ControlPlane for ControlDevice {
    fn create_device(&self, spec: DeviceSpec) -> Result<usize> {
        // 满了就不必读盘建帧源
        if self.registry.is_full() {
            return Err(VcamError::CapacityExceeded {
                max: self.registry.capacity(),
            });
        }

        let id = DeviceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let device = Arc::new(VirtualDevice::create(id, &spec, &self.config)?);
        let index = self.registry.register(device)?;

        tracing::info!(
            target: "vcam::control",
            "Created device {} at index {}",
            id,
            index
        );
        Ok(index)
    }

    fn destroy_device(&self, index: usize) -> Result<()> {
        let device = self.registry.remove_if(index, |device| {
            match device.outstanding_buffers() {
                0 => Ok(()),
                outstanding => Err(VcamError::Busy { outstanding }),
            }
        })?;

        // 锁外：停流、join、关闭消费端
        device.shutdown();
        tracing::info!(
            target: "vcam::control",
            "USB disconnect, device number {} ({})",
            index + 1,
            device.id()
        );
        Ok(())
    }

    fn get_device(&self, index: usize) -> Result<DeviceSpec> {
        let device = self.registry.lookup(index)?;
        Ok(Self::spec_at(index, &device))
    }

    fn modify_device(&self, index: usize, patch: &DeviceSpecPatch) -> Result<()> {
        let device = self.registry.lookup(index)?;
        device.modify(patch)
    }

    fn list_devices(&self) -> Result<Vec<DeviceSpec>> {
        Ok(self
            .registry
            .snapshot()
            .iter()
            .enumerate()
            .map(|(i, d)| Self::spec_at(i, d))
            .collect())
    }

    fn open(&self, index: usize) -> Result<Box<dyn Stream>> {
        let device = self.registry.lookup(index)?;
        Ok(Box::new(device.open_stream()?))
    }

    fn export_state(&self, index: usize) -> Result<serde_json::Value> {
        let device = self.registry.lookup(index)?;
        let mut state = device.export_state();
        state["index"] = serde_json::Value::from(index);
        Ok(state)
    }
}

impl Drop for ControlDevice {
    fn drop(&mut self) {
        for device in self.registry.snapshot() {
            device.shutdown();
        }
    }
}
