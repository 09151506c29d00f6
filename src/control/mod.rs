//! The control plane turns an application configuration document into provisioned devices and
//! per service unit network contexts.
//!
//! Construction brings up the network environment once per process, allocates the shared
//! [MemPool], walks the declared service units counting how many distinct units reference each
//! physical device, and finally initializes every referenced device exactly once with that many
//! receive and transmit queues. Each referencing unit is assigned its own queue on the device, in
//! declaration order.
//!
//! ```no_run
//! use libqio::{ControlPlane, LoopbackFabric, LoopbackQueue, SoftDriver};
//!
//! let control = ControlPlane::new("app.yaml", SoftDriver::new()).unwrap();
//! let fabric = LoopbackFabric::new();
//! let units = control
//!     .service_units(|_| Ok(LoopbackQueue::new(fabric.clone())))
//!     .unwrap();
//! println!("{} units, logging to {}", units.len(), control.log_dir().display());
//! ```

mod config;

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process,
};

use tracing::{debug, error, info};

pub use self::config::{IoDecl, QioConfig, ServiceUnitConfig, NETWORK_Q};

use crate::{
    context::{self, NetContext, QueueBinding},
    device::NetDriver,
    io_queue::IoQueueApi,
    service::ServiceUnit,
    sga::MemPool,
    Error, Result,
};

/// The provisioned state derived from one configuration document.
pub struct ControlPlane<D> {
    driver: D,
    pool: MemPool,
    contexts: Vec<NetContext>,
    devices: BTreeMap<u16, u32>,
    log_dir: PathBuf,
}

impl<D> ControlPlane<D>
where
    D: NetDriver,
{
    /// Build the control plane from the configuration file at `app_cfg`.
    ///
    /// A malformed or incomplete configuration is fatal, it is reported and the process exits
    /// with status 1 before any device is touched. Every other failure is returned.
    pub fn new<P>(app_cfg: P, driver: D) -> Result<ControlPlane<D>>
    where
        P: AsRef<Path>,
    {
        match ControlPlane::build(app_cfg.as_ref(), driver) {
            Err(Error::Config(msg)) => {
                error!(config = %app_cfg.as_ref().display(), %msg, "invalid configuration");
                eprintln!("Failed to parse config: {msg}");
                process::exit(1);
            }
            other => other,
        }
    }

    /// Like [ControlPlane::new], but configuration errors are returned as [Error::Config].
    pub fn build<P>(app_cfg: P, driver: D) -> Result<ControlPlane<D>>
    where
        P: AsRef<Path>,
    {
        let app_cfg = app_cfg.as_ref();
        let config = QioConfig::load(app_cfg)?;
        ControlPlane::with_config(app_cfg, config, driver)
    }

    /// Build from an already loaded document. `app_cfg` is handed to the driver's environment
    /// initialization.
    pub fn with_config(
        app_cfg: &Path,
        config: QioConfig,
        mut driver: D,
    ) -> Result<ControlPlane<D>> {
        context::init_once(app_cfg, |cfg| driver.global_env_init(cfg))?;

        let pool = driver.mempool_init(&config.mempool)?;
        info!(
            buffers = pool.capacity(),
            buffer_size = pool.buffer_size(),
            "mempool allocated"
        );

        let (devices, bindings) = partition(&config)?;

        let contexts = bindings
            .into_iter()
            .map(|bindings| driver.init_net_context(&pool, bindings))
            .collect::<Vec<_>>();

        for (&device_id, &queues) in &devices {
            driver.device_init(device_id, &pool, queues, queues)?;
        }

        info!(
            service_units = contexts.len(),
            devices = devices.len(),
            log_dir = %config.log_dir.display(),
            "control plane ready"
        );

        Ok(ControlPlane {
            driver,
            pool,
            contexts,
            devices,
            log_dir: config.log_dir,
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Device id to the number of service units sharing it.
    pub fn devices(&self) -> &BTreeMap<u16, u32> {
        &self.devices
    }

    pub fn pool(&self) -> &MemPool {
        &self.pool
    }

    pub fn num_service_units(&self) -> usize {
        self.contexts.len()
    }

    /// The network context of service unit `id`.
    pub fn context(&self, id: usize) -> Option<&NetContext> {
        self.contexts.get(id)
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Hand out service unit `id` running on the backend `io`.
    pub fn service_unit<B>(&self, id: usize, io: B) -> Result<ServiceUnit<B>>
    where
        B: IoQueueApi,
    {
        let ctx = self.context(id).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "service unit {id} does not exist, {} are configured",
                self.contexts.len()
            ))
        })?;
        Ok(ServiceUnit::new(id, io, ctx.clone()))
    }

    /// Hand out every configured service unit, with backends created by `make_io`.
    pub fn service_units<B, F>(&self, mut make_io: F) -> Result<Vec<ServiceUnit<B>>>
    where
        B: IoQueueApi,
        F: FnMut(usize) -> Result<B>,
    {
        (0..self.contexts.len())
            .map(|id| self.service_unit(id, make_io(id)?))
            .collect()
    }
}

/// Walk the declared service units, counting distinct referencing units per device and assigning
/// each unit its queue on every device it declares.
fn partition(config: &QioConfig) -> Result<(BTreeMap<u16, u32>, Vec<Vec<QueueBinding>>)> {
    let mut devices = BTreeMap::new();
    let mut units = Vec::with_capacity(config.service_units.len());

    for (id, unit) in config.service_units.iter().enumerate() {
        let mut bindings: Vec<QueueBinding> = Vec::new();
        for decl in unit.decls().iter().filter(|decl| decl.is_network()) {
            let device_id = decl.device_id.ok_or_else(|| {
                Error::Config(format!(
                    "service unit {id} declares a {NETWORK_Q} without a device_id"
                ))
            })?;
            if bindings.iter().any(|b| b.device_id == device_id) {
                continue;
            }

            let count: &mut u32 = devices.entry(device_id).or_default();
            let queue_id = u16::try_from(*count).map_err(|_| {
                Error::Config(format!("device {device_id} is shared by too many service units"))
            })?;
            *count += 1;
            debug!(unit = id, device_id, queue_id, "service unit assigned device queue");
            bindings.push(QueueBinding {
                device_id,
                queue_id,
            });
        }
        units.push(bindings);
    }

    Ok((devices, units))
}

#[cfg(test)]
mod tests {
    use crate::{
        device::SoftDriver,
        io_queue::{LoopbackFabric, LoopbackQueue},
    };

    use super::*;

    fn cfg(doc: &str) -> QioConfig {
        QioConfig::from_yaml_str(doc).unwrap()
    }

    #[test]
    fn partition_counts_distinct_units() {
        let config = cfg(r#"
service_units:
  - io:
      - type: NETWORK_Q
        device_id: 3
      - type: NETWORK_Q
        device_id: 3
  - - type: NETWORK_Q
      device_id: 3
    - type: NETWORK_Q
      device_id: 1
  - - type: DISK_Q
log_dir: logs
"#);
        let (devices, units) = partition(&config).unwrap();
        assert_eq!(devices, BTreeMap::from([(1, 1), (3, 2)]));
        assert_eq!(
            units[0],
            vec![QueueBinding {
                device_id: 3,
                queue_id: 0
            }]
        );
        assert_eq!(
            units[1],
            vec![
                QueueBinding {
                    device_id: 3,
                    queue_id: 1
                },
                QueueBinding {
                    device_id: 1,
                    queue_id: 0
                },
            ]
        );
        assert!(units[2].is_empty());
    }

    #[test]
    fn missing_device_id_initializes_nothing() {
        let config = cfg(r#"
service_units:
  - - type: NETWORK_Q
      device_id: 0
  - - type: NETWORK_Q
log_dir: logs
"#);
        let mut driver = SoftDriver::new();
        let err = ControlPlane::with_config(Path::new("qio.yaml"), config, &mut driver)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("service unit 1")));
        assert_eq!(driver.device_inits(), 0);
    }

    #[test]
    fn builds_contexts_per_unit() {
        let config = cfg(r#"
service_units:
  - - type: NETWORK_Q
      device_id: 0
  - - type: NETWORK_Q
      device_id: 0
  - []
log_dir: logs
mempool:
  buffers: 32
  buffer_size: 256
"#);
        let control =
            ControlPlane::with_config(Path::new("qio.yaml"), config, SoftDriver::new()).unwrap();

        assert_eq!(control.num_service_units(), 3);
        assert_eq!(control.devices(), &BTreeMap::from([(0, 2)]));
        assert_eq!(control.log_dir(), Path::new("logs"));
        assert_eq!(control.pool().capacity(), 32);

        let info = control.driver().device(0).unwrap();
        assert_eq!((info.rx_queues, info.tx_queues), (2, 2));
        assert_eq!(info.buffer_size, 256);
        assert_eq!(control.driver().device_inits(), 1);

        let a = control.context(0).unwrap();
        let b = control.context(1).unwrap();
        assert!(a.pool().ptr_eq(b.pool()));
        assert_eq!(a.binding().map(|b| b.queue_id), Some(0));
        assert_eq!(b.binding().map(|b| b.queue_id), Some(1));
        assert!(!control.context(2).unwrap().is_bound());

        let fabric = LoopbackFabric::new();
        let units = control
            .service_units(|_| Ok(LoopbackQueue::new(fabric.clone())))
            .unwrap();
        assert_eq!(units.len(), 3);
        assert_eq!(units[2].id(), 2);
        assert!(units[1].context().ptr_eq(b));
        assert!(matches!(
            control.service_unit(3, LoopbackQueue::new(fabric)),
            Err(Error::InvalidArgument(_))
        ));
    }
}
