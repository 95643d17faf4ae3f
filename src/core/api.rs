//! HTTP surface of the driver: one `POST` route per protocol call.

use std::{fmt::Debug, sync::Arc};

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use log::{debug, error, warn};
use serde::{de::DeserializeOwned, Serialize};

use crate::core::{
    error::{DriverError, DriverResult},
    msg::{ActivateResponse, Empty, ErrorResponse},
    network::Driver,
};

type SharedDriver = State<Arc<Driver>>;

pub fn router(driver: Arc<Driver>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/NetworkDriver.GetCapabilities", post(get_capabilities))
        .route("/NetworkDriver.CreateNetwork", post(create_network))
        .route("/NetworkDriver.DeleteNetwork", post(delete_network))
        .route("/NetworkDriver.AllocateNetwork", post(allocate_network))
        .route("/NetworkDriver.FreeNetwork", post(free_network))
        .route("/NetworkDriver.CreateEndpoint", post(create_endpoint))
        .route("/NetworkDriver.DeleteEndpoint", post(delete_endpoint))
        .route("/NetworkDriver.EndpointOperInfo", post(endpoint_info))
        .route("/NetworkDriver.Join", post(join))
        .route("/NetworkDriver.Leave", post(leave))
        .route("/NetworkDriver.DiscoverNew", post(discover_new))
        .route("/NetworkDriver.DiscoverDelete", post(discover_delete))
        .route(
            "/NetworkDriver.ProgramExternalConnectivity",
            post(program_external_connectivity),
        )
        .route(
            "/NetworkDriver.RevokeExternalConnectivity",
            post(revoke_external_connectivity),
        )
        .with_state(driver)
}

/// Decode a request body. The orchestrator sends nothing at all for calls
/// without arguments, which is read as `{}`.
fn decode<T: DeserializeOwned + Debug>(op: &str, body: &Bytes) -> DriverResult<T> {
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };

    let req = serde_json::from_slice(body)
        .map_err(|e| DriverError::bad_request(format!("Malformed {op} request: {e}")))?;
    debug!("{op}: {req:?}");

    Ok(req)
}

fn reply<T: Serialize>(op: &str, res: DriverResult<T>) -> Response {
    match res {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => {
            let err = e.report();
            match e {
                DriverError::NotImplemented { .. } => debug!("{op}: {err}"),
                DriverError::BadRequest { .. } => warn!("{op}: {err}"),
                _ => error!("{op}: {err}"),
            }
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { err }),
            )
                .into_response()
        }
    }
}

async fn activate() -> Json<ActivateResponse> {
    debug!("Plugin activated");
    Json(ActivateResponse {
        implements: vec!["NetworkDriver".to_string()],
    })
}

async fn get_capabilities(State(driver): SharedDriver) -> Response {
    reply("GetCapabilities", Ok(driver.capabilities()))
}

async fn create_network(State(driver): SharedDriver, body: Bytes) -> Response {
    const OP: &str = "CreateNetwork";
    let res = async { driver.create_network(decode(OP, &body)?).await }.await;
    reply(OP, res.map(|()| Empty {}))
}

async fn delete_network(State(driver): SharedDriver, body: Bytes) -> Response {
    const OP: &str = "DeleteNetwork";
    let res = async { driver.delete_network(decode(OP, &body)?).await }.await;
    reply(OP, res.map(|()| Empty {}))
}

async fn allocate_network(State(driver): SharedDriver, body: Bytes) -> Response {
    const OP: &str = "AllocateNetwork";
    let res = async { driver.allocate_network(decode(OP, &body)?).await }.await;
    reply(OP, res.map(|()| Empty {}))
}

async fn free_network(State(driver): SharedDriver, body: Bytes) -> Response {
    const OP: &str = "FreeNetwork";
    let res = async { driver.free_network(decode(OP, &body)?).await }.await;
    reply(OP, res.map(|()| Empty {}))
}

async fn create_endpoint(State(driver): SharedDriver, body: Bytes) -> Response {
    const OP: &str = "CreateEndpoint";
    let res = async { driver.create_endpoint(decode(OP, &body)?).await }.await;
    reply(OP, res)
}

async fn delete_endpoint(State(driver): SharedDriver, body: Bytes) -> Response {
    const OP: &str = "DeleteEndpoint";
    let res = async { driver.delete_endpoint(decode(OP, &body)?).await }.await;
    reply(OP, res.map(|()| Empty {}))
}

async fn endpoint_info(State(driver): SharedDriver, body: Bytes) -> Response {
    const OP: &str = "EndpointOperInfo";
    let res = async { driver.endpoint_info(decode(OP, &body)?).await }.await;
    reply(OP, res)
}

async fn join(State(driver): SharedDriver, body: Bytes) -> Response {
    const OP: &str = "Join";
    let res = async { driver.join(decode(OP, &body)?).await }.await;
    reply(OP, res)
}

async fn leave(State(driver): SharedDriver, body: Bytes) -> Response {
    const OP: &str = "Leave";
    let res = async { driver.leave(decode(OP, &body)?).await }.await;
    reply(OP, res.map(|()| Empty {}))
}

async fn discover_new(State(driver): SharedDriver, body: Bytes) -> Response {
    const OP: &str = "DiscoverNew";
    let res = async { driver.discover_new(decode(OP, &body)?).await }.await;
    reply(OP, res.map(|()| Empty {}))
}

async fn discover_delete(State(driver): SharedDriver, body: Bytes) -> Response {
    const OP: &str = "DiscoverDelete";
    let res = async { driver.discover_delete(decode(OP, &body)?).await }.await;
    reply(OP, res.map(|()| Empty {}))
}

async fn program_external_connectivity(State(driver): SharedDriver, body: Bytes) -> Response {
    const OP: &str = "ProgramExternalConnectivity";
    let res = async {
        driver
            .program_external_connectivity(decode(OP, &body)?)
            .await
    }
    .await;
    reply(OP, res.map(|()| Empty {}))
}

async fn revoke_external_connectivity(State(driver): SharedDriver, body: Bytes) -> Response {
    const OP: &str = "RevokeExternalConnectivity";
    let res = async { driver.revoke_external_connectivity(decode(OP, &body)?).await }.await;
    reply(OP, res.map(|()| Empty {}))
}
