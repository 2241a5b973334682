//! 设备注册表：有上限、索引稠密的设备列表
//!
//! 锁只保护 Vec 本身，持锁期间不分配内存、不做 IO、不 join 线程。

use std::sync::{Arc, Mutex, MutexGuard};

use vcam_core::error::{Result, VcamError};

use crate::device::{DeviceId, VirtualDevice};
use crate::lock;

#[derive(Debug)]
pub struct DeviceRegistry {
    devices: Mutex<Vec<Arc<VirtualDevice>>>,
    capacity: usize,
}

impl DeviceRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            // 预先分配，注册时不会在锁内扩容
            devices: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    fn devices(&self) -> MutexGuard<'_, Vec<Arc<VirtualDevice>>> {
        lock(&self.devices)
    }

    /// 追加到末尾，返回新索引
    pub fn register(&self, device: Arc<VirtualDevice>) -> Result<usize> {
        let mut devices = self.devices();
        if devices.len() >= self.capacity {
            return Err(VcamError::CapacityExceeded { max: self.capacity });
        }
        devices.push(device);
        Ok(devices.len() - 1)
    }

    pub fn lookup(&self, index: usize) -> Result<Arc<VirtualDevice>> {
        let devices = self.devices();
        devices
            .get(index)
            .cloned()
            .ok_or(VcamError::OutOfRange {
                index,
                count: devices.len(),
            })
    }

    /// 移除 `index`，之后的设备索引整体减一
    pub fn remove(&self, index: usize) -> Result<Arc<VirtualDevice>> {
        self.remove_if(index, |_| Ok(()))
    }

    /// 在同一次加锁内检查并移除，`check` 失败时注册表不变。
    /// `check` 只能做无阻塞的读取。
    pub fn remove_if<F>(&self, index: usize, check: F) -> Result<Arc<VirtualDevice>>
    where
        F: FnOnce(&VirtualDevice) -> Result<()>,
    {
        let mut devices = self.devices();
        let count = devices.len();
        let device = devices
            .get(index)
            .ok_or(VcamError::OutOfRange { index, count })?;
        check(device)?;
        Ok(devices.remove(index))
    }

    pub fn len(&self) -> usize {
        self.devices().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// 按索引顺序拷贝出所有设备句柄
    pub fn snapshot(&self) -> Vec<Arc<VirtualDevice>> {
        self.devices().clone()
    }

    /// 稳定 ID → 当前索引
    pub fn index_of(&self, id: DeviceId) -> Option<usize> {
        self.devices().iter().position(|d| d.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcam_core::builder::RegistryConfig;
    use vcam_core::spec::DeviceSpec;

    fn dev(id: u64) -> Arc<VirtualDevice> {
        Arc::new(
            VirtualDevice::create(DeviceId(id), &DeviceSpec::default(), &RegistryConfig::new())
                .unwrap(),
        )
    }

    #[test]
    fn capacity_is_enforced() {
        let reg = DeviceRegistry::new(2);
        assert_eq!(reg.register(dev(0)).unwrap(), 0);
        assert_eq!(reg.register(dev(1)).unwrap(), 1);
        assert!(reg.is_full());
        let err = reg.register(dev(2)).unwrap_err();
        assert!(matches!(err, VcamError::CapacityExceeded { max: 2 }));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn removal_shifts_later_indices() {
        let reg = DeviceRegistry::new(4);
        for id in 0..3 {
            reg.register(dev(id)).unwrap();
        }
        let removed = reg.remove(0).unwrap();
        assert_eq!(removed.id(), DeviceId(0));
        assert_eq!(reg.lookup(0).unwrap().id(), DeviceId(1));
        assert_eq!(reg.index_of(DeviceId(2)), Some(1));
        assert_eq!(reg.index_of(DeviceId(0)), None);
    }

    #[test]
    fn lookup_out_of_range() {
        let reg = DeviceRegistry::new(1);
        let err = reg.lookup(0).unwrap_err();
        assert!(matches!(err, VcamError::OutOfRange { index: 0, count: 0 }));
        assert!(reg.remove(3).is_err());
    }

    #[test]
    fn failed_check_leaves_registry_intact() {
        let reg = DeviceRegistry::new(2);
        reg.register(dev(7)).unwrap();
        let err = reg
            .remove_if(0, |_| Err(VcamError::Busy { outstanding: 1 }))
            .unwrap_err();
        assert!(matches!(err, VcamError::Busy { outstanding: 1 }));
        assert_eq!(reg.len(), 1);
    }
}
