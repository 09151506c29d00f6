//! The device layer is the boundary between the control plane and whatever actually drives the
//! network hardware. A [NetDriver] brings up the network environment, allocates the shared
//! buffer pool and provisions physical devices with receive/transmit queues.
//!
//! [SoftDriver] is the in-tree implementation, it keeps a registry of provisioned devices and is
//! used together with the kernel socket and loopback backends, neither of which needs real device
//! queues.

mod soft;

use std::path::Path;

pub use soft::{DeviceInfo, SoftDriver};

use crate::{
    context::{NetContext, QueueBinding},
    sga::{MemPool, MemPoolOptions},
    Result,
};

/// The driver capability set the control plane builds on.
pub trait NetDriver {
    /// Bring up the driver's process wide execution environment. Called at most once per process,
    /// before any other driver call.
    fn global_env_init(&mut self, app_cfg: &Path) -> Result<()>;

    /// Allocate the shared buffer pool.
    fn mempool_init(&mut self, options: &MemPoolOptions) -> Result<MemPool>;

    /// Configure a physical device with the given receive and transmit queue counts.
    fn device_init(
        &mut self,
        device_id: u16,
        pool: &MemPool,
        rx_queues: u32,
        tx_queues: u32,
    ) -> Result<()>;

    /// Create the network context for one service unit.
    fn init_net_context(&mut self, pool: &MemPool, bindings: Vec<QueueBinding>) -> NetContext {
        NetContext::new(pool.clone(), bindings)
    }
}

impl<D> NetDriver for &mut D
where
    D: NetDriver + ?Sized,
{
    fn global_env_init(&mut self, app_cfg: &Path) -> Result<()> {
        (**self).global_env_init(app_cfg)
    }

    fn mempool_init(&mut self, options: &MemPoolOptions) -> Result<MemPool> {
        (**self).mempool_init(options)
    }

    fn device_init(
        &mut self,
        device_id: u16,
        pool: &MemPool,
        rx_queues: u32,
        tx_queues: u32,
    ) -> Result<()> {
        (**self).device_init(device_id, pool, rx_queues, tx_queues)
    }

    fn init_net_context(&mut self, pool: &MemPool, bindings: Vec<QueueBinding>) -> NetContext {
        (**self).init_net_context(pool, bindings)
    }
}
