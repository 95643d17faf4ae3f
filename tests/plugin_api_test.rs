use std::{path::Path, sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
    sync::oneshot,
    task::JoinHandle,
};
use vdenet::{serve, Driver, PersistenceGateway};

mod common;
use common::*;

struct Server {
    dir: TempDir,
    stop: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Server {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let links = Arc::new(FakeLinks::default());
        let switch = Arc::new(FakeSwitch::default());
        let driver = Arc::new(Driver::new(
            PersistenceGateway::in_dir(dir.path()),
            controller(&links, &switch),
        ));

        let socket = dir.path().join("plugins/vde.sock");
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            serve(driver, &socket, async move {
                let _ = stopped.await;
            })
            .await
        });

        let server = Server { dir, stop, task };
        for _ in 0..100 {
            if UnixStream::connect(server.socket()).await.is_ok() {
                return server;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("server did not come up");
    }

    fn socket(&self) -> std::path::PathBuf {
        self.dir.path().join("plugins/vde.sock")
    }

    async fn shutdown(self) {
        let socket = self.socket();
        self.stop.send(()).unwrap();
        self.task.await.unwrap().unwrap();
        assert!(!socket.exists());
    }
}

/// Send one request and return the status code with the decoded body.
async fn post(socket: &Path, route: &str, body: &str) -> (u16, Value) {
    let mut stream = UnixStream::connect(socket).await.unwrap();
    let request = format!(
        "POST {route} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/vnd.docker.plugins.v1.2+json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    let status = head
        .split_whitespace()
        .nth(1)
        .unwrap()
        .parse::<u16>()
        .unwrap();

    (status, serde_json::from_str(body).unwrap())
}

#[tokio::test]
async fn test_activate_and_capabilities() {
    let server = Server::start().await;

    let (status, body) = post(&server.socket(), "/Plugin.Activate", "").await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"Implements": ["NetworkDriver"]}));

    let (status, body) = post(&server.socket(), "/NetworkDriver.GetCapabilities", "").await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"Scope": "local", "ConnectivityScope": "local"}));

    server.shutdown().await;
}

#[tokio::test]
async fn test_network_and_endpoint_calls() {
    let server = Server::start().await;
    let socket = server.socket();

    let create = json!({
        "NetworkID": "n1",
        "Options": {"com.docker.network.generic": {"sock": "vde:///tmp/sw"}},
        "IPv4Data": [{"Pool": "10.10.0.0/24", "Gateway": "10.10.0.1/24"}],
    });
    let (status, body) = post(&socket, "/NetworkDriver.CreateNetwork", &create.to_string()).await;
    assert_eq!((status, body), (200, json!({})));

    let endpoint = json!({
        "NetworkID": "n1",
        "EndpointID": "abcdef0123456789",
        "Interface": {"Address": "10.10.0.2/24", "MacAddress": "02:42:0a:0a:00:02"},
    });
    let (status, body) = post(
        &socket,
        "/NetworkDriver.CreateEndpoint",
        &endpoint.to_string(),
    )
    .await;
    assert_eq!((status, body), (200, json!({})));

    let join = json!({"NetworkID": "n1", "EndpointID": "abcdef0123456789", "SandboxKey": "/x"});
    let (status, body) = post(&socket, "/NetworkDriver.Join", &join.to_string()).await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({
            "InterfaceName": {"SrcName": "vdeabcdef01234", "DstPrefix": "vde"},
            "Gateway": "10.10.0.1",
            "DisableGatewayService": false
        })
    );

    let ep = json!({"NetworkID": "n1", "EndpointID": "abcdef0123456789"});
    let (status, body) = post(&socket, "/NetworkDriver.EndpointOperInfo", &ep.to_string()).await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({"Value": {"id": "abcdef0123456789", "srcName": "vdeabcdef01234"}})
    );

    let (status, _) = post(&socket, "/NetworkDriver.Leave", &ep.to_string()).await;
    assert_eq!(status, 200);
    let (status, _) = post(&socket, "/NetworkDriver.DeleteEndpoint", &ep.to_string()).await;
    assert_eq!(status, 200);

    let (status, body) = post(
        &socket,
        "/NetworkDriver.DeleteNetwork",
        r#"{"NetworkID": "n1"}"#,
    )
    .await;
    assert_eq!((status, body), (200, json!({})));

    server.shutdown().await;
}

#[tokio::test]
async fn test_errors_carry_err_field() {
    let server = Server::start().await;
    let socket = server.socket();

    let (status, body) = post(
        &socket,
        "/NetworkDriver.DeleteNetwork",
        r#"{"NetworkID": "missing"}"#,
    )
    .await;
    assert_eq!(status, 500);
    assert!(body["Err"].as_str().unwrap().contains("missing"));

    let (status, body) = post(&socket, "/NetworkDriver.CreateNetwork", "{not json").await;
    assert_eq!(status, 500);
    assert!(body["Err"].as_str().unwrap().starts_with("Bad request"));

    let (status, body) = post(
        &socket,
        "/NetworkDriver.AllocateNetwork",
        r#"{"NetworkID": "n1"}"#,
    )
    .await;
    assert_eq!(status, 500);
    assert!(body["Err"].is_string());

    let (status, body) = post(
        &socket,
        "/NetworkDriver.DiscoverNew",
        r#"{"DiscoveryType": 1, "DiscoveryData": {}}"#,
    )
    .await;
    assert_eq!((status, body), (200, json!({})));

    server.shutdown().await;
}
