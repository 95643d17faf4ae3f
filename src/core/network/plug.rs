use std::{
    collections::HashMap,
    path::PathBuf,
    process::Stdio,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use log::{debug, warn};
use tokio::{process::Child, sync::Mutex};

use super::link::{AttachHandle, SwitchAttacher};

/// How long a fresh `vde_plug` has to stay alive to count as connected.
const PLUG_GRACE: Duration = Duration::from_millis(300);

/// Attaches taps to a VDE switch by running one `vde_plug` per endpoint.
///
/// Children are killed together with this process, so a handle never outlives
/// the process that created it.
pub struct VdePlugAttacher {
    program: PathBuf,
    plugs: Mutex<HashMap<u64, Child>>,
    next_handle: AtomicU64,
}

impl VdePlugAttacher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        VdePlugAttacher {
            program: program.into(),
            plugs: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub async fn active(&self) -> usize {
        self.plugs.lock().await.len()
    }
}

#[async_trait]
impl SwitchAttacher for VdePlugAttacher {
    async fn attach(&self, link: &str, switch: &str) -> anyhow::Result<AttachHandle> {
        debug!("Plugging {link} into {switch}");

        let mut child = tokio::process::Command::new(&self.program)
            .arg(switch)
            .arg(format!("tap://{link}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program.display()))?;

        // A plug that cannot reach the switch exits right away.
        match tokio::time::timeout(PLUG_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                return Err(anyhow::anyhow!(
                    "vde_plug for {link} exited early with {status}"
                ))
            }
            Ok(Err(e)) => return Err(e).context("Failed to poll vde_plug"),
            Err(_) => {}
        }

        let handle = AttachHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.plugs.lock().await.insert(handle.raw(), child);

        Ok(handle)
    }

    async fn detach(&self, handle: AttachHandle) {
        let child = self.plugs.lock().await.remove(&handle.raw());

        let Some(mut child) = child else {
            debug!("Detach of unknown {handle}, nothing to do");
            return;
        };

        if let Err(e) = child.start_kill() {
            warn!("Failed to kill vde_plug of {handle}: {e}");
        }

        match tokio::time::timeout(PLUG_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!("vde_plug of {handle} exited with {status}"),
            Ok(Err(e)) => warn!("Failed to reap vde_plug of {handle}: {e}"),
            Err(_) => warn!("vde_plug of {handle} did not exit in time"),
        }
    }
}
