//! # libqio
//!
//! A userspace, queue based asynchronous I/O runtime for linux. Applications issue push and pop
//! operations against opaque queue descriptors and collect completions by polling the tokens those
//! operations hand back. There is no event loop, no timers and no callbacks, a service unit spins
//! on its own backend with the bounded [wait] primitives and is free to interleave that with
//! whatever other work it has. The package is split up into a handful of modules each handling a
//! specific subset of the functionality needed:
//!
//! - [sga] The scatter-gather buffer model and the shared [MemPool].
//! - [queue] Queue descriptors, tokens and results.
//! - [io_queue] The [IoQueueApi] backend interface and its `io_uring` and loopback
//!   implementations.
//! - [wait] Bounded busy polling over one or many tokens.
//! - [control] The control plane partitioning network devices between service units.
//! - [service] The [ServiceUnit] handle applications work through.
//!
//! At a high level a datagram echo between two service units looks like this:
//!
//! ```no_run
//! use libqio::{
//!     io_queue::{AddressFamily, SockType},
//!     ControlPlane, LoopbackFabric, LoopbackQueue, SgArray, SoftDriver,
//! };
//!
//! fn main() -> libqio::Result<()> {
//!     // Both units declare a NETWORK_Q on device 0, so it is brought up with two queue pairs.
//!     let control = ControlPlane::new("qio.yaml", SoftDriver::new())?;
//!
//!     let fabric = LoopbackFabric::new();
//!     let mut server = control.service_unit(0, LoopbackQueue::new(fabric.clone()))?;
//!     let mut client = control.service_unit(1, LoopbackQueue::new(fabric))?;
//!
//!     let sqd = server.open_socket(AddressFamily::Inet, SockType::Datagram, None)?;
//!     server.bind(sqd, "127.0.0.1:9091".parse().unwrap())?;
//!     let cqd = client.open_socket(AddressFamily::Inet, SockType::Datagram, None)?;
//!     client.connect(cqd, "127.0.0.1:9091".parse().unwrap())?;
//!
//!     let pop = server.pop(sqd)?;
//!     let push = client.push(cqd, SgArray::from_slice(b"hello")?)?;
//!     client.wait(push)?;
//!
//!     // Each wait gives up after a bounded number of polls, so keep at it until the message
//!     // shows up.
//!     let request = loop {
//!         match server.wait(pop) {
//!             Err(e) if e.is_timeout() => continue,
//!             other => break other?,
//!         }
//!     };
//!
//!     let sga = request.into_sga().expect("pop resolves into a scatter-gather array");
//!     println!("Client request: {}", String::from_utf8_lossy(&sga.to_vec()));
//!
//!     // Releasing the array hands its buffers back to the pool.
//!     sga.release();
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod control;
pub mod device;
pub mod error;
pub mod io_queue;
pub mod io_uring;
pub(crate) mod net;
pub mod queue;
pub mod service;
pub mod sga;
pub(crate) mod sync;
pub mod wait;

pub use context::{NetContext, QueueBinding};
pub use control::{ControlPlane, QioConfig};
pub use device::{NetDriver, SoftDriver};
pub use error::{Error, Result};
pub use io_queue::{IoQueueApi, LoopbackFabric, LoopbackQueue, UringQueue};
pub use queue::{OpKind, QDesc, QResult, QToken, QValue};
pub use service::ServiceUnit;
pub use sga::{MemPool, MemPoolOptions, Segment, SgArray};
pub use wait::{WaitConfig, WaitCursor, WAIT_MAX_ITER};
