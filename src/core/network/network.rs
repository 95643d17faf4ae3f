use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use log::{debug, error, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::RwLock;

use super::{
    endpoint::{EndpointController, EndpointRecord},
    options::NetworkOptions,
    reconcile::reconcile,
};
use crate::core::{
    error::{DriverError, DriverResult},
    metas::PersistenceGateway,
    msg::{
        CapabilitiesResponse, CreateEndpointRequest, CreateEndpointResponse, CreateNetworkRequest,
        DiscoveryNotification, EndpointRequest, InfoResponse, JoinRequest, JoinResponse,
        NetworkRequest, ProgramExternalConnectivityRequest, Scope,
    },
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct NetworkRecord {
    #[serde(rename = "Sock")]
    pub sock: String,
    #[serde(rename = "IfPrefix")]
    pub if_prefix: String,
    #[serde(rename = "IPv4Pool")]
    pub ipv4_pool: String,
    #[serde(rename = "IPv4Gateway", default)]
    pub ipv4_gateway: String,
    #[serde(rename = "IPv6Pool", default)]
    pub ipv6_pool: String,
    #[serde(rename = "IPv6Gateway", default)]
    pub ipv6_gateway: String,
    #[serde(rename = "Endpoints", default, deserialize_with = "null_as_default")]
    pub endpoints: HashMap<String, EndpointRecord>,
}

impl From<NetworkOptions> for NetworkRecord {
    fn from(opts: NetworkOptions) -> Self {
        let ipv6 = opts.ipv6.unwrap_or_default();

        NetworkRecord {
            sock: opts.sock,
            if_prefix: opts.if_prefix,
            ipv4_pool: opts.ipv4.pool,
            ipv4_gateway: opts.ipv4.gateway,
            ipv6_pool: ipv6.pool,
            ipv6_gateway: ipv6.gateway,
            endpoints: HashMap::new(),
        }
    }
}

/// Everything the driver knows, and exactly what goes into the datastore.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DriverState {
    #[serde(rename = "Networks", default, deserialize_with = "null_as_default")]
    pub networks: HashMap<String, NetworkRecord>,
}

impl DriverState {
    pub fn endpoint_count(&self) -> usize {
        self.networks.values().map(|n| n.endpoints.len()).sum()
    }

    fn network(&self, id: &str) -> DriverResult<&NetworkRecord> {
        self.networks
            .get(id)
            .ok_or_else(|| DriverError::not_found(format!("Network {id} not found")))
    }

    fn network_mut(&mut self, id: &str) -> DriverResult<&mut NetworkRecord> {
        self.networks
            .get_mut(id)
            .ok_or_else(|| DriverError::not_found(format!("Network {id} not found")))
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The network driver.
///
/// All registry access goes through one `RwLock`. Mutations hold the write
/// guard until the new state has been handed to the datastore, so no caller
/// can observe a state that was not persisted first.
pub struct Driver {
    state: RwLock<DriverState>,
    endpoints: EndpointController,
    store: PersistenceGateway,
    degraded: AtomicBool,
}

impl Driver {
    /// A driver with an empty registry, the datastore is not read.
    pub fn new(store: PersistenceGateway, endpoints: EndpointController) -> Self {
        Driver {
            state: RwLock::new(DriverState::default()),
            endpoints,
            store,
            degraded: AtomicBool::new(false),
        }
    }

    /// Restore the registry from the datastore and drop every endpoint that
    /// could not have survived the restart.
    pub async fn bootstrap(
        store: PersistenceGateway,
        endpoints: EndpointController,
        clean: bool,
    ) -> Self {
        if clean {
            if let Err(e) = store.clean().await {
                warn!("{}", e.report());
            }
        }

        let snapshot = store.load().await;
        let writable = snapshot.is_writable();
        let mut state = snapshot.into_state();
        let report = reconcile(&mut state, &endpoints).await;
        info!(
            "Restored {} networks, pruned {} stale endpoints",
            state.networks.len(),
            report.pruned.len()
        );

        let driver = Driver {
            state: RwLock::new(state),
            endpoints,
            store,
            degraded: AtomicBool::new(false),
        };
        if writable {
            let state = driver.state.read().await;
            driver.persist(&state).await;
        }

        driver
    }

    /// Whether the last datastore write failed. The in-memory registry stays
    /// authoritative either way.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Copy of the registry.
    pub async fn snapshot(&self) -> DriverState {
        self.state.read().await.clone()
    }

    pub async fn network(&self, id: &str) -> Option<NetworkRecord> {
        self.state.read().await.networks.get(id).cloned()
    }

    pub fn capabilities(&self) -> CapabilitiesResponse {
        CapabilitiesResponse {
            scope: Scope::Local,
            connectivity_scope: Scope::Local,
        }
    }

    pub async fn create_network(&self, req: CreateNetworkRequest) -> DriverResult<()> {
        let opts = NetworkOptions::parse(&req)?;

        let mut state = self.state.write().await;
        if state.networks.contains_key(&req.network_id) {
            return Err(DriverError::bad_request(format!(
                "Network {} already exists",
                req.network_id
            )));
        }

        info!(
            "Creating network {} on switch {} (prefix {})",
            req.network_id, opts.sock, opts.if_prefix
        );
        state
            .networks
            .insert(req.network_id, NetworkRecord::from(opts));

        self.persist(&state).await;
        Ok(())
    }

    pub async fn delete_network(&self, req: NetworkRequest) -> DriverResult<()> {
        let mut state = self.state.write().await;

        let network = state.network(&req.network_id)?;
        if !network.endpoints.is_empty() {
            return Err(DriverError::bad_request(format!(
                "Network {} still has {} active endpoints",
                req.network_id,
                network.endpoints.len()
            )));
        }

        info!("Deleting network {}", req.network_id);
        state.networks.remove(&req.network_id);

        self.persist(&state).await;
        Ok(())
    }

    pub async fn allocate_network(&self, req: NetworkRequest) -> DriverResult<()> {
        debug!("AllocateNetwork {} refused", req.network_id);
        Err(DriverError::not_implemented("AllocateNetwork"))
    }

    pub async fn free_network(&self, req: NetworkRequest) -> DriverResult<()> {
        debug!("FreeNetwork {} refused", req.network_id);
        Err(DriverError::not_implemented("FreeNetwork"))
    }

    pub async fn create_endpoint(
        &self,
        req: CreateEndpointRequest,
    ) -> DriverResult<CreateEndpointResponse> {
        let mut state = self.state.write().await;

        let network = state.network_mut(&req.network_id)?;
        let response = self.endpoints.create_endpoint(network, &req)?;

        self.persist(&state).await;
        Ok(response)
    }

    pub async fn delete_endpoint(&self, req: EndpointRequest) -> DriverResult<()> {
        let mut state = self.state.write().await;

        let network = state.network_mut(&req.network_id)?;
        self.endpoints
            .delete_endpoint(network, &req.endpoint_id)
            .await?;

        info!("Endpoint {} deleted", req.endpoint_id);
        self.persist(&state).await;
        Ok(())
    }

    pub async fn endpoint_info(&self, req: EndpointRequest) -> DriverResult<InfoResponse> {
        let state = self.state.read().await;

        let network = state.network(&req.network_id)?;
        self.endpoints.endpoint_info(network, &req.endpoint_id)
    }

    pub async fn join(&self, req: JoinRequest) -> DriverResult<JoinResponse> {
        let mut state = self.state.write().await;

        let network = state.network_mut(&req.network_id)?;
        let response = self
            .endpoints
            .join(network, &req.endpoint_id, &req.sandbox_key)
            .await?;

        self.persist(&state).await;
        Ok(response)
    }

    pub async fn leave(&self, req: EndpointRequest) -> DriverResult<()> {
        let mut state = self.state.write().await;

        let network = state.network_mut(&req.network_id)?;
        self.endpoints.leave(network, &req.endpoint_id).await?;

        self.persist(&state).await;
        Ok(())
    }

    pub async fn discover_new(&self, notification: DiscoveryNotification) -> DriverResult<()> {
        debug!("DiscoverNew type {} ignored", notification.discovery_type);
        Ok(())
    }

    pub async fn discover_delete(&self, notification: DiscoveryNotification) -> DriverResult<()> {
        debug!("DiscoverDelete type {} ignored", notification.discovery_type);
        Ok(())
    }

    pub async fn program_external_connectivity(
        &self,
        req: ProgramExternalConnectivityRequest,
    ) -> DriverResult<()> {
        debug!(
            "ProgramExternalConnectivity for {} ignored",
            req.endpoint_id
        );
        Ok(())
    }

    pub async fn revoke_external_connectivity(&self, req: EndpointRequest) -> DriverResult<()> {
        debug!("RevokeExternalConnectivity for {} ignored", req.endpoint_id);
        Ok(())
    }

    /// Write `state` to the datastore. Failures only degrade durability.
    async fn persist(&self, state: &DriverState) {
        match self.store.store(state).await {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    info!("Datastore writable again");
                }
            }
            Err(e) => {
                self.degraded.store(true, Ordering::Relaxed);
                error!("{}, continuing with in-memory state", e.report());
            }
        }
    }
}
