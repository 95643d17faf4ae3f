use std::net::IpAddr;

use anyhow::Context;
use async_trait::async_trait;
use futures::TryStreamExt;
use log::{debug, warn};
use macaddr::MacAddr6;
use netlink_packet_route::link::LinkMessage;
use nix::errno::Errno;

use super::link::{LinkProvisioner, LinkRemoval};

/// Backs endpoints with persistent TAP devices (no packet information header).
///
/// The device itself is created through `ip tuntap`, everything else goes over
/// rtnetlink.
pub struct TapProvisioner {}

impl TapProvisioner {
    pub fn new() -> Self {
        TapProvisioner {}
    }

    async fn create_tap(&self, name: &str) -> anyhow::Result<()> {
        let output = tokio::process::Command::new("ip")
            .args(["tuntap", "add", "dev", name, "mode", "tap"])
            .output()
            .await
            .context("Failed to run `ip tuntap`")?;

        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "`ip tuntap add` exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(())
    }

    async fn set_link_address(&self, name: &str, mac: &str) -> anyhow::Result<()> {
        let mac: MacAddr6 = mac
            .parse()
            .with_context(|| format!("Invalid MAC address {mac}"))?;

        let (connection, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(connection);

        let link = self
            .get_link_by_name(name, &handle)
            .await?
            .ok_or(anyhow::anyhow!("Link {name} not found"))?;

        handle
            .link()
            .set(link.header.index)
            .address(mac.as_bytes().to_vec())
            .execute()
            .await?;

        Ok(())
    }

    async fn delete_link(&self, name: &str) -> anyhow::Result<LinkRemoval> {
        let (connection, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(connection);

        let link = match self.get_link_by_name(name, &handle).await? {
            Some(link) => link,
            None => return Ok(LinkRemoval::AlreadyAbsent),
        };

        match handle.link().del(link.header.index).execute().await {
            Ok(()) => Ok(LinkRemoval::Destroyed),
            // Lost a race against another teardown.
            Err(e) if is_no_device(&e) => Ok(LinkRemoval::AlreadyAbsent),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_link_by_name(
        &self,
        name: &str,
        handle: &rtnetlink::Handle,
    ) -> anyhow::Result<Option<LinkMessage>> {
        match handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute()
            .try_next()
            .await
        {
            Ok(link) => Ok(link),
            Err(e) if is_no_device(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for TapProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkProvisioner for TapProvisioner {
    async fn create(&self, name: &str, mac: &str) -> anyhow::Result<()> {
        debug!("Creating tap {name} with hwaddr {mac}");
        self.create_tap(name)
            .await
            .with_context(|| format!("Failed to create tap {name}"))?;

        if let Err(e) = self.set_link_address(name, mac).await {
            if let Err(rollback) = self.delete_link(name).await {
                warn!("Failed to remove tap {name} after a failed create: {rollback:#}");
            }
            return Err(e.context(format!("Failed to set hwaddr of {name}")));
        }

        Ok(())
    }

    async fn assign_address(&self, name: &str, cidr: &str) -> anyhow::Result<()> {
        let (ip, prefix_len) = parse_cidr(cidr)?;

        let (connection, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(connection);

        let link = self
            .get_link_by_name(name, &handle)
            .await?
            .ok_or(anyhow::anyhow!("Link {name} not found"))?;

        handle
            .address()
            .add(link.header.index, ip, prefix_len)
            .execute()
            .await?;

        Ok(())
    }

    async fn destroy(&self, name: &str) -> anyhow::Result<LinkRemoval> {
        debug!("Deleting tap {name}");
        self.delete_link(name)
            .await
            .with_context(|| format!("Failed to delete tap {name}"))
    }
}

fn is_no_device(err: &rtnetlink::Error) -> bool {
    match err {
        rtnetlink::Error::NetlinkError(msg) => {
            msg.code.map(|code| code.get()) == Some(-(Errno::ENODEV as i32))
        }
        _ => false,
    }
}

/// Split `addr/len` into its parts, the prefix length must fit the family.
pub fn parse_cidr(cidr: &str) -> anyhow::Result<(IpAddr, u8)> {
    let (ip_str, len_str) = cidr
        .split_once('/')
        .ok_or(anyhow::anyhow!("Invalid CIDR {cidr}"))?;

    let ip = ip_str.parse::<IpAddr>()?;
    let len = len_str.parse::<u8>()?;

    let max = if ip.is_ipv4() { 32 } else { 128 };
    if len > max {
        return Err(anyhow::anyhow!("Invalid prefix length {len} in {cidr}"));
    }

    Ok((ip, len))
}
