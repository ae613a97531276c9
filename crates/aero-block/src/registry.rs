use std::sync::{Arc, RwLock};

use crate::{BlockDevice, Device, DeviceId};

/// Resolve a device id to a registered device.
pub trait DeviceLookup: Send + Sync {
    fn device(&self, id: DeviceId) -> Option<Device>;
}

/// Arena of devices addressed by [`DeviceId`].
///
/// Ids are handed out sequentially and never reused; devices are never removed.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, device: Device) -> DeviceId {
        let id = DeviceId(self.devices.len() as u32);
        tracing::debug!(dev_id = id.0, kind = ?device.kind(), len = device.len(), "device registered");
        self.devices.push(device);
        id
    }

    pub fn register_block(&mut self, device: Arc<dyn BlockDevice>) -> DeviceId {
        self.register(Device::Block(device))
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl DeviceLookup for DeviceRegistry {
    fn device(&self, id: DeviceId) -> Option<Device> {
        self.get(id).cloned()
    }
}

impl DeviceLookup for RwLock<DeviceRegistry> {
    fn device(&self, id: DeviceId) -> Option<Device> {
        let registry = match self.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        registry.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceKind, MemBlockDevice};

    #[test]
    fn ids_are_sequential_and_stable() {
        let mut registry = DeviceRegistry::new();
        let a = registry.register_block(Arc::new(MemBlockDevice::new(vec![0; 16])));
        let b = registry.register(Device::Passthrough { len: 4096 });

        assert_eq!(a, DeviceId(0));
        assert_eq!(b, DeviceId(1));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(a).unwrap().kind(), DeviceKind::Block);
        assert_eq!(registry.get(b).unwrap().kind(), DeviceKind::Passthrough);
        assert_eq!(registry.get(b).unwrap().len(), 4096);
        assert!(registry.get(DeviceId(2)).is_none());
    }

    #[test]
    fn lookup_through_lock_clones_the_handle() {
        let lock = RwLock::new(DeviceRegistry::new());
        let id = lock
            .write()
            .unwrap()
            .register_block(Arc::new(MemBlockDevice::new(vec![1, 2, 3])));

        let dev = lock.device(id).expect("registered");
        assert_eq!(dev.as_block().unwrap().len(), 3);
    }
}
