use std::{
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use lazy_static::lazy_static;
use tracing::{debug, info};

use crate::Result;

#[derive(Default)]
struct EnvState {
    config: Option<PathBuf>,
}

lazy_static! {
    static ref ENV: Mutex<EnvState> = Mutex::new(EnvState::default());
}

fn env() -> MutexGuard<'static, EnvState> {
    ENV.lock()
        .expect("failed to lock network environment: poisoned")
}

/// Run `init` to bring up the process wide network environment, unless it is already up. The
/// lock is held for the duration of `init`, so concurrent callers observe exactly one
/// initialization. Returns whether `init` ran.
pub fn init_once<F>(app_cfg: &Path, init: F) -> Result<bool>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let mut state = env();
    if let Some(existing) = &state.config {
        debug!(config = %existing.display(), "network environment already initialized");
        return Ok(false);
    }

    init(app_cfg)?;
    info!(config = %app_cfg.display(), "network environment initialized");
    state.config = Some(app_cfg.to_path_buf());
    Ok(true)
}

/// Whether the network environment has been initialized in this process.
pub fn is_initialized() -> bool {
    env().config.is_some()
}

/// Tear the network environment down, a later [init_once] initializes it again. Every queue and
/// control plane built on the previous environment must be gone by then.
pub fn teardown() {
    if env().config.take().is_some() {
        info!("network environment torn down");
    }
}
