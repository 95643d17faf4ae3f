use log::{info, warn};

use super::{endpoint::EndpointController, link::LinkRemoval, network::DriverState};

/// What a reconciliation pass did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileReport {
    /// `(network, endpoint)` pairs dropped from the registry.
    pub pruned: Vec<(String, String)>,
    /// Leftover links that were still present and got removed.
    pub links_removed: usize,
    /// Leftover links that could not be removed.
    pub failures: usize,
}

/// Drop every endpoint without a live attachment.
///
/// Attachment handles are process-local and never persisted, so right after a
/// restart no endpoint has one: its switch plug died with the old process and
/// whatever link it left behind is removed here. Networks are kept. Failing
/// link removals are logged and do not stop the pass.
pub async fn reconcile(state: &mut DriverState, endpoints: &EndpointController) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for (network_id, network) in state.networks.iter_mut() {
        let stale: Vec<String> = network
            .endpoints
            .iter()
            .filter(|(_, endpoint)| !endpoint.is_plugged())
            .map(|(id, _)| id.clone())
            .collect();

        for endpoint_id in stale {
            let Some(endpoint) = network.endpoints.remove(&endpoint_id) else {
                continue;
            };

            match endpoints.remove_stale_link(&endpoint.if_name).await {
                Ok(LinkRemoval::Destroyed) => {
                    info!("Removed leftover link {}", endpoint.if_name);
                    report.links_removed += 1;
                }
                Ok(LinkRemoval::AlreadyAbsent) => {}
                Err(e) => {
                    warn!("{}, dropping endpoint {endpoint_id} anyway", e.report());
                    report.failures += 1;
                }
            }

            info!("Pruned stale endpoint {endpoint_id} of network {network_id}");
            report.pruned.push((network_id.clone(), endpoint_id));
        }
    }

    report
}
