use std::{future::Future, net::IpAddr, sync::Arc, time::Duration};

use log::{debug, info, warn};
use macaddr::MacAddr6;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use super::{
    link::{AttachHandle, LinkProvisioner, LinkRemoval, SwitchAttacher},
    network::NetworkRecord,
    tap::parse_cidr,
};
use crate::core::{
    error::{DriverError, DriverResult},
    msg::{
        CreateEndpointRequest, CreateEndpointResponse, EndpointInterface, InfoResponse,
        InterfaceName, JoinResponse,
    },
};

/// Prefix of every host-side interface name.
pub const IF_PREFIX: &str = "vde";
/// Number of endpoint ID bytes appended to `IF_PREFIX`.
pub const IF_ID_LEN: usize = 11;
/// Kernel limit on interface names, NUL included.
const IFNAMSIZ: usize = 16;
const _: () = assert!(IF_PREFIX.len() + IF_ID_LEN < IFNAMSIZ);

pub const EXTERNAL_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EndpointRecord {
    #[serde(rename = "IfName")]
    pub if_name: String,
    #[serde(rename = "SandboxKey", default)]
    pub sandbox_key: String,
    #[serde(rename = "IPv4Address", default)]
    pub ipv4_address: String,
    #[serde(rename = "IPv6Address", default)]
    pub ipv6_address: String,
    #[serde(rename = "MacAddress", default)]
    pub mac_address: String,
    #[serde(skip)]
    pub plug: AttachHandle,
}

impl EndpointRecord {
    pub fn new(endpoint_id: &str, interface: &EndpointInterface, mac_address: String) -> Self {
        EndpointRecord {
            if_name: interface_name(endpoint_id),
            sandbox_key: String::new(),
            ipv4_address: interface.address.clone(),
            ipv6_address: interface.address_ipv6.clone(),
            mac_address,
            plug: AttachHandle::DETACHED,
        }
    }

    pub fn is_plugged(&self) -> bool {
        self.plug.is_attached()
    }
}

/// Host-side interface name of an endpoint: `IF_PREFIX` plus the head of its ID.
pub fn interface_name(endpoint_id: &str) -> String {
    let mut cut = endpoint_id.len().min(IF_ID_LEN);
    while !endpoint_id.is_char_boundary(cut) {
        cut -= 1;
    }

    format!("{IF_PREFIX}{}", &endpoint_id[..cut])
}

/// Random locally administered unicast MAC address, same recipe as the
/// kernel's `eth_random_addr`.
pub fn random_mac() -> String {
    let mut mac = [0u8; 6];
    OsRng.fill_bytes(&mut mac);

    mac[0] &= 0xfe; // clear multicast bit
    mac[0] |= 0x02; // set local assignment bit (IEEE802)

    mac.iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(":")
}

/// Address part of a gateway given as `addr` or `addr/len`.
pub fn gateway_address(gateway: &str) -> Option<IpAddr> {
    if gateway.is_empty() {
        return None;
    }

    let addr = gateway.split_once('/').map_or(gateway, |(addr, _)| addr);
    match addr.parse() {
        Ok(ip) => Some(ip),
        Err(_) => {
            warn!("Ignoring unparseable gateway {gateway}");
            None
        }
    }
}

/// Drives endpoints through Detached -> Linked -> Plugged and back.
///
/// Every call into the link provisioner or the switch is bounded by
/// `timeout`; a call that does not finish in time becomes a retryable error.
pub struct EndpointController {
    links: Arc<dyn LinkProvisioner>,
    switch: Arc<dyn SwitchAttacher>,
    timeout: Duration,
}

impl EndpointController {
    pub fn new(links: Arc<dyn LinkProvisioner>, switch: Arc<dyn SwitchAttacher>) -> Self {
        EndpointController {
            links,
            switch,
            timeout: EXTERNAL_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a new, still detached endpoint.
    pub fn create_endpoint(
        &self,
        network: &mut NetworkRecord,
        req: &CreateEndpointRequest,
    ) -> DriverResult<CreateEndpointResponse> {
        let id = req.endpoint_id.as_str();
        if id.is_empty() {
            return Err(DriverError::bad_request("EndpointID missing"));
        }
        if network.endpoints.contains_key(id) {
            return Err(DriverError::bad_request(format!(
                "Endpoint {id} already exists"
            )));
        }

        let interface = req.interface.clone().unwrap_or_default();
        let (mac_address, generated) = if interface.mac_address.is_empty() {
            (random_mac(), true)
        } else {
            interface.mac_address.parse::<MacAddr6>().map_err(|e| {
                DriverError::bad_request(format!(
                    "Invalid MAC address {}: {e}",
                    interface.mac_address
                ))
            })?;
            (interface.mac_address.clone(), false)
        };

        let endpoint = EndpointRecord::new(id, &interface, mac_address);
        debug!(
            "Endpoint {id} gets interface {} hwaddr {}",
            endpoint.if_name, endpoint.mac_address
        );

        let response = CreateEndpointResponse {
            interface: generated.then(|| EndpointInterface {
                mac_address: endpoint.mac_address.clone(),
                ..Default::default()
            }),
        };
        network.endpoints.insert(id.to_string(), endpoint);

        Ok(response)
    }

    /// Create the endpoint's link and plug it into the network's switch.
    ///
    /// On failure nothing is left behind: a link created here is removed again
    /// before the error is returned and the record stays detached.
    pub async fn join(
        &self,
        network: &mut NetworkRecord,
        endpoint_id: &str,
        sandbox_key: &str,
    ) -> DriverResult<JoinResponse> {
        let endpoint = network
            .endpoints
            .get_mut(endpoint_id)
            .ok_or_else(|| DriverError::not_found(format!("Endpoint {endpoint_id} not found")))?;

        if endpoint.is_plugged() {
            return Err(DriverError::bad_request(format!(
                "Endpoint {endpoint_id} already joined"
            )));
        }

        let if_name = endpoint.if_name.clone();

        // Detached -> Linked
        match self
            .bounded(
                format!("Creating link {if_name}"),
                self.links.create(&if_name, &endpoint.mac_address),
            )
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(DriverError::retryable(
                    format!("Failed to create link {if_name}"),
                    Some(e),
                ))
            }
            Err(e) => {
                self.discard_link(&if_name).await;
                return Err(e);
            }
        }

        for cidr in [&endpoint.ipv4_address, &endpoint.ipv6_address] {
            self.assign_address(&if_name, cidr).await;
        }

        // Linked -> Plugged
        let plug = match self
            .bounded(
                format!("Plugging {if_name} into {}", network.sock),
                self.switch.attach(&if_name, &network.sock),
            )
            .await
        {
            Ok(Ok(plug)) => plug,
            Ok(Err(e)) => {
                self.discard_link(&if_name).await;
                return Err(DriverError::unreachable(
                    format!("Failed to plug {if_name} into {}", network.sock),
                    e,
                ));
            }
            Err(e) => {
                self.discard_link(&if_name).await;
                return Err(e);
            }
        };

        info!("Endpoint {endpoint_id} plugged into {} as {plug}", network.sock);
        endpoint.plug = plug;
        endpoint.sandbox_key = sandbox_key.to_string();

        Ok(JoinResponse {
            interface_name: InterfaceName {
                src_name: if_name,
                dst_prefix: network.if_prefix.clone(),
            },
            gateway: gateway_address(&network.ipv4_gateway)
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
            gateway_ipv6: gateway_address(&network.ipv6_gateway)
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
            disable_gateway_service: false,
        })
    }

    /// Unplug the endpoint and remove its link. Detached endpoints and links
    /// that are already gone are fine.
    pub async fn leave(&self, network: &mut NetworkRecord, endpoint_id: &str) -> DriverResult<()> {
        let endpoint = network
            .endpoints
            .get_mut(endpoint_id)
            .ok_or_else(|| DriverError::not_found(format!("Endpoint {endpoint_id} not found")))?;

        self.teardown(endpoint).await
    }

    pub async fn delete_endpoint(
        &self,
        network: &mut NetworkRecord,
        endpoint_id: &str,
    ) -> DriverResult<()> {
        let endpoint = network
            .endpoints
            .get_mut(endpoint_id)
            .ok_or_else(|| DriverError::not_found(format!("Endpoint {endpoint_id} not found")))?;

        if let Err(e) = self.teardown(endpoint).await {
            warn!("{}, deleting endpoint {endpoint_id} anyway", e.report());
        }
        network.endpoints.remove(endpoint_id);

        Ok(())
    }

    pub fn endpoint_info(
        &self,
        network: &NetworkRecord,
        endpoint_id: &str,
    ) -> DriverResult<InfoResponse> {
        let endpoint = network
            .endpoints
            .get(endpoint_id)
            .ok_or_else(|| DriverError::not_found(format!("Endpoint {endpoint_id} not found")))?;

        let mut info = InfoResponse::default();
        info.value.insert("id".to_string(), endpoint_id.to_string());
        info.value
            .insert("srcName".to_string(), endpoint.if_name.clone());

        Ok(info)
    }

    /// Remove a link left over by an earlier process, if any.
    pub async fn remove_stale_link(&self, if_name: &str) -> DriverResult<LinkRemoval> {
        match self
            .bounded(format!("Removing link {if_name}"), self.links.destroy(if_name))
            .await?
        {
            Ok(removal) => Ok(removal),
            Err(e) => Err(DriverError::retryable(
                format!("Failed to remove link {if_name}"),
                Some(e),
            )),
        }
    }

    async fn teardown(&self, endpoint: &mut EndpointRecord) -> DriverResult<()> {
        if endpoint.plug.is_attached() {
            let plug = endpoint.plug;
            if self
                .bounded(format!("Unplugging {plug}"), async {
                    self.switch.detach(plug).await;
                    Ok::<(), anyhow::Error>(())
                })
                .await
                .is_err()
            {
                warn!("Unplugging {} from {plug} timed out", endpoint.if_name);
            }
            endpoint.plug = AttachHandle::DETACHED;
        }

        match self.remove_stale_link(&endpoint.if_name).await? {
            LinkRemoval::Destroyed => debug!("Link {} removed", endpoint.if_name),
            LinkRemoval::AlreadyAbsent => debug!("Link {} already gone", endpoint.if_name),
        }

        Ok(())
    }

    async fn assign_address(&self, if_name: &str, cidr: &str) {
        if cidr.is_empty() || parse_cidr(cidr).is_err() {
            return;
        }

        match self
            .bounded(
                format!("Assigning {cidr} to {if_name}"),
                self.links.assign_address(if_name, cidr),
            )
            .await
        {
            Ok(Ok(())) => debug!("Assigned {cidr} to {if_name}"),
            Ok(Err(e)) => warn!("Failed to assign {cidr} to {if_name}: {e:#}"),
            Err(e) => warn!("{e}"),
        }
    }

    /// Best-effort rollback of a link created by a failed join.
    async fn discard_link(&self, if_name: &str) {
        if let Err(e) = self.remove_stale_link(if_name).await {
            warn!("Rollback of link {if_name} failed: {}", e.report());
        }
    }

    async fn bounded<T, F>(&self, what: String, call: F) -> DriverResult<anyhow::Result<T>>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        tokio::time::timeout(self.timeout, call).await.map_err(|_| {
            DriverError::retryable(
                format!("{what} did not finish within {:?}", self.timeout),
                None,
            )
        })
    }
}
