use async_trait::async_trait;

/// Process-local token identifying a live attachment to the switch.
///
/// Handles are meaningless in any other process, so they are never written to
/// the datastore. `AttachHandle::DETACHED` marks an endpoint with no live
/// attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AttachHandle(u64);

impl AttachHandle {
    pub const DETACHED: AttachHandle = AttachHandle(0);

    pub fn new(raw: u64) -> Self {
        AttachHandle(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_attached(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for AttachHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "plug#{}", self.0)
    }
}

/// Outcome of tearing down a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRemoval {
    Destroyed,
    AlreadyAbsent,
}

/// Creates and destroys the OS virtual links endpoints are backed by.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkProvisioner: Send + Sync {
    /// Create a link named `name` with hardware address `mac`.
    async fn create(&self, name: &str, mac: &str) -> anyhow::Result<()>;

    /// Assign `cidr` to the link. Callers treat failures as best-effort.
    async fn assign_address(&self, name: &str, cidr: &str) -> anyhow::Result<()>;

    async fn destroy(&self, name: &str) -> anyhow::Result<LinkRemoval>;
}

/// Connects links to the external switch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwitchAttacher: Send + Sync {
    /// Plug link `link` into the switch reachable at `switch`.
    async fn attach(&self, link: &str, switch: &str) -> anyhow::Result<AttachHandle>;

    /// Unplug a previous attachment. Unknown handles are ignored.
    async fn detach(&self, handle: AttachHandle);
}
