// SPDX-License-Identifier: MPL-2.0

//! The byte-device registry.
//!
//! Character-device vnodes carry a device id; reads and writes on them are
//! routed to the driver registered for that id. Opening a device node whose
//! id has no driver fails with `ENXIO`.

use lazy_static::lazy_static;

use super::vnode::{mkdevid, DevId};
use crate::prelude::*;

/// Id of the memory null device.
pub const MEM_NULL_DEVID: DevId = mkdevid(1, 0);
/// Id of the memory zero device.
pub const MEM_ZERO_DEVID: DevId = mkdevid(1, 1);

pub trait ByteDevice: Send + Sync {
    fn read_at(&self, off: usize, buf: &mut [u8]) -> Result<usize>;
    fn write_at(&self, off: usize, buf: &[u8]) -> Result<usize>;
}

lazy_static! {
    static ref BYTE_DEVICES: SpinLock<BTreeMap<DevId, Arc<dyn ByteDevice>>> =
        SpinLock::new(BTreeMap::new());
}

pub fn register_byte_device(dev: DevId, driver: Arc<dyn ByteDevice>) {
    BYTE_DEVICES.lock().insert(dev, driver);
}

pub fn byte_device(dev: DevId) -> Option<Arc<dyn ByteDevice>> {
    BYTE_DEVICES.lock().get(&dev).cloned()
}

/// Sinks writes, yields end-of-file on reads.
struct NullDevice;

impl ByteDevice for NullDevice {
    fn read_at(&self, _off: usize, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    fn write_at(&self, _off: usize, buf: &[u8]) -> Result<usize> {
        Ok(buf.len())
    }
}

/// Sinks writes, yields zero bytes on reads.
struct ZeroDevice;

impl ByteDevice for ZeroDevice {
    fn read_at(&self, _off: usize, buf: &mut [u8]) -> Result<usize> {
        buf.fill(0);
        Ok(buf.len())
    }

    fn write_at(&self, _off: usize, buf: &[u8]) -> Result<usize> {
        Ok(buf.len())
    }
}

/// Registers the memory devices. Called at boot.
pub(crate) fn init() {
    let mut devices = BYTE_DEVICES.lock();
    devices.clear();
    devices.insert(MEM_NULL_DEVID, Arc::new(NullDevice) as Arc<dyn ByteDevice>);
    devices.insert(MEM_ZERO_DEVID, Arc::new(ZeroDevice) as Arc<dyn ByteDevice>);
}
