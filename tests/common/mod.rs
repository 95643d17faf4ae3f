#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use vdenet::{
    AttachHandle, CreateEndpointRequest, CreateNetworkRequest, Driver, EndpointController,
    EndpointInterface, LinkProvisioner, LinkRemoval, PersistenceGateway, SwitchAttacher,
    GENERIC_OPTIONS,
};

/// In-memory links keyed by name, holding their MAC and addresses.
#[derive(Default)]
pub struct FakeLinks {
    pub links: Mutex<HashMap<String, (String, Vec<String>)>>,
    pub fail_create: AtomicBool,
    pub fail_destroy: AtomicBool,
}

impl FakeLinks {
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.links.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn insert(&self, name: &str) {
        self.links
            .lock()
            .unwrap()
            .insert(name.to_string(), (String::new(), vec![]));
    }
}

#[async_trait]
impl LinkProvisioner for FakeLinks {
    async fn create(&self, name: &str, mac: &str) -> anyhow::Result<()> {
        if self.fail_create.load(Ordering::Relaxed) {
            anyhow::bail!("Operation not permitted");
        }

        let mut links = self.links.lock().unwrap();
        if links.contains_key(name) {
            anyhow::bail!("Link {name} exists");
        }
        links.insert(name.to_string(), (mac.to_string(), vec![]));
        Ok(())
    }

    async fn assign_address(&self, name: &str, cidr: &str) -> anyhow::Result<()> {
        match self.links.lock().unwrap().get_mut(name) {
            Some((_, addrs)) => {
                addrs.push(cidr.to_string());
                Ok(())
            }
            None => anyhow::bail!("Link {name} not found"),
        }
    }

    async fn destroy(&self, name: &str) -> anyhow::Result<LinkRemoval> {
        if self.fail_destroy.load(Ordering::Relaxed) {
            anyhow::bail!("Operation not permitted");
        }

        Ok(match self.links.lock().unwrap().remove(name) {
            Some(_) => LinkRemoval::Destroyed,
            None => LinkRemoval::AlreadyAbsent,
        })
    }
}

/// A switch that is reachable unless told otherwise.
pub struct FakeSwitch {
    pub plugs: Mutex<HashSet<AttachHandle>>,
    pub unreachable: AtomicBool,
    next: AtomicU64,
}

impl Default for FakeSwitch {
    fn default() -> Self {
        FakeSwitch {
            plugs: Mutex::new(HashSet::new()),
            unreachable: AtomicBool::new(false),
            next: AtomicU64::new(1),
        }
    }
}

impl FakeSwitch {
    pub fn active(&self) -> usize {
        self.plugs.lock().unwrap().len()
    }
}

#[async_trait]
impl SwitchAttacher for FakeSwitch {
    async fn attach(&self, _link: &str, switch: &str) -> anyhow::Result<AttachHandle> {
        if self.unreachable.load(Ordering::Relaxed) {
            anyhow::bail!("Connection refused: {switch}");
        }

        let handle = AttachHandle::new(self.next.fetch_add(1, Ordering::Relaxed));
        self.plugs.lock().unwrap().insert(handle);
        Ok(handle)
    }

    async fn detach(&self, handle: AttachHandle) {
        self.plugs.lock().unwrap().remove(&handle);
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub links: Arc<FakeLinks>,
    pub switch: Arc<FakeSwitch>,
    pub driver: Arc<Driver>,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let links = Arc::new(FakeLinks::default());
        let switch = Arc::new(FakeSwitch::default());

        let driver = Driver::bootstrap(
            PersistenceGateway::in_dir(dir.path()),
            controller(&links, &switch),
            false,
        )
        .await;

        Harness {
            dir,
            links,
            switch,
            driver: Arc::new(driver),
        }
    }

    /// A second driver on the same datastore, as after a restart.
    pub async fn restart(&self) -> Driver {
        Driver::bootstrap(
            PersistenceGateway::in_dir(self.dir.path()),
            controller(&self.links, &self.switch),
            false,
        )
        .await
    }

    pub fn store(&self) -> PersistenceGateway {
        PersistenceGateway::in_dir(self.dir.path())
    }
}

pub fn controller(links: &Arc<FakeLinks>, switch: &Arc<FakeSwitch>) -> EndpointController {
    EndpointController::new(links.clone(), switch.clone())
}

pub fn network_request(id: &str, sock: Option<&str>) -> CreateNetworkRequest {
    let generic = match sock {
        Some(sock) => json!({ "sock": sock }),
        None => json!({}),
    };

    serde_json::from_value(json!({
        "NetworkID": id,
        "Options": { GENERIC_OPTIONS: generic },
        "IPv4Data": [{"AddressSpace": "LocalDefault", "Pool": "10.10.0.0/24", "Gateway": "10.10.0.1/24"}],
        "IPv6Data": [],
    }))
    .unwrap()
}

pub fn endpoint_request(network_id: &str, endpoint_id: &str) -> CreateEndpointRequest {
    CreateEndpointRequest {
        network_id: network_id.to_string(),
        endpoint_id: endpoint_id.to_string(),
        interface: Some(EndpointInterface {
            address: "10.10.0.2/24".to_string(),
            ..Default::default()
        }),
        options: None,
    }
}
