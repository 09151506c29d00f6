use std::{collections::BTreeMap, path::Path};

use tracing::{debug, info};

use crate::{
    sga::{MemPool, MemPoolOptions},
    Error, Result,
};

use super::NetDriver;

/// Default number of addressable devices.
pub const DEFAULT_MAX_DEVICES: u16 = 32;

/// Default per device queue limit.
pub const DEFAULT_MAX_QUEUES: u32 = 16;

/// What a device was provisioned with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub rx_queues: u32,
    pub tx_queues: u32,
    pub buffer_size: usize,
}

/// A software [NetDriver] that validates and records device provisioning without touching any
/// hardware.
#[derive(Debug)]
pub struct SoftDriver {
    max_devices: u16,
    max_queues: u32,
    env_inits: usize,
    devices: BTreeMap<u16, DeviceInfo>,
    device_inits: usize,
}

impl SoftDriver {
    pub fn new() -> SoftDriver {
        SoftDriver::with_limits(DEFAULT_MAX_DEVICES, DEFAULT_MAX_QUEUES)
    }

    pub fn with_limits(max_devices: u16, max_queues: u32) -> SoftDriver {
        SoftDriver {
            max_devices,
            max_queues,
            env_inits: 0,
            devices: BTreeMap::new(),
            device_inits: 0,
        }
    }

    /// Every device provisioned so far.
    pub fn devices(&self) -> &BTreeMap<u16, DeviceInfo> {
        &self.devices
    }

    pub fn device(&self, device_id: u16) -> Option<&DeviceInfo> {
        self.devices.get(&device_id)
    }

    /// Total number of successful [NetDriver::device_init] calls.
    pub fn device_inits(&self) -> usize {
        self.device_inits
    }

    /// Number of times this driver brought up the environment, at most once per process.
    pub fn env_inits(&self) -> usize {
        self.env_inits
    }
}

impl Default for SoftDriver {
    fn default() -> Self {
        SoftDriver::new()
    }
}

impl NetDriver for SoftDriver {
    fn global_env_init(&mut self, app_cfg: &Path) -> Result<()> {
        self.env_inits += 1;
        debug!(config = %app_cfg.display(), "soft driver environment up");
        Ok(())
    }

    fn mempool_init(&mut self, options: &MemPoolOptions) -> Result<MemPool> {
        MemPool::new(options).map_err(|e| Error::ResourceExhausted(e.to_string()))
    }

    fn device_init(
        &mut self,
        device_id: u16,
        pool: &MemPool,
        rx_queues: u32,
        tx_queues: u32,
    ) -> Result<()> {
        if device_id >= self.max_devices {
            return Err(Error::InvalidArgument(format!(
                "device {device_id} does not exist, {} devices available",
                self.max_devices
            )));
        }

        if self.devices.contains_key(&device_id) {
            return Err(Error::InvalidArgument(format!(
                "device {device_id} is already initialized"
            )));
        }

        for (dir, count) in [("rx", rx_queues), ("tx", tx_queues)] {
            if count == 0 || count > self.max_queues {
                return Err(Error::ResourceExhausted(format!(
                    "device {device_id} cannot provide {count} {dir} queues, limit is {}",
                    self.max_queues
                )));
            }
        }

        self.devices.insert(
            device_id,
            DeviceInfo {
                rx_queues,
                tx_queues,
                buffer_size: pool.buffer_size(),
            },
        );
        self.device_inits += 1;
        info!(device_id, rx_queues, tx_queues, "device initialized");
        Ok(())
    }
}
