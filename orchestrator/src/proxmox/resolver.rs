//! Guest address resolution with polling

use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::PlatformError;
use crate::models::DeploymentKind;
use crate::proxmox::InstanceNetwork;

/// Attempts before giving up on an address
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Pause between attempts
pub const RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Interfaces considered the guest's primary NIC
const PRIMARY_INTERFACES: [&str; 2] = ["eth0", "ens18"];

/// Poll the guest until it reports a usable IPv4 address.
///
/// Freshly booted guests take a while to configure networking (and VMs
/// take a while to start their agent), so "no address yet" and transient
/// query errors both just consume an attempt. Only exhausting the attempt
/// budget is an error.
pub async fn resolve_address<N, S, F>(
    network: &N,
    kind: DeploymentKind,
    vm_id: u32,
    max_attempts: u32,
    sleep_fn: S,
) -> Result<String, PlatformError>
where
    N: InstanceNetwork + ?Sized,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    for attempt in 1..=max_attempts {
        let found = match kind {
            DeploymentKind::Lxc => lxc_address(network, vm_id).await,
            DeploymentKind::Vm => vm_address(network, vm_id).await,
        };

        match found {
            Ok(Some(address)) => {
                debug!(
                    "resolved address {} for instance {} on attempt {}",
                    address, vm_id, attempt
                );
                return Ok(address);
            }
            Ok(None) => {
                debug!(
                    "instance {} has no address yet (attempt {}/{})",
                    vm_id, attempt, max_attempts
                );
            }
            Err(err) => {
                warn!(
                    "address query for instance {} failed (attempt {}/{}): {}",
                    vm_id, attempt, max_attempts, err
                );
            }
        }

        if attempt < max_attempts {
            sleep_fn(RETRY_INTERVAL).await;
        }
    }

    Err(PlatformError::AddressUnresolved {
        vm_id,
        attempts: max_attempts,
    })
}

async fn lxc_address<N: InstanceNetwork + ?Sized>(
    network: &N,
    vm_id: u32,
) -> Result<Option<String>, PlatformError> {
    let interfaces = network.lxc_interfaces(vm_id).await?;

    for interface in interfaces {
        if interface.name != "eth0" {
            continue;
        }
        let Some(inet) = interface.inet else { continue };
        // The container reports CIDR notation, e.g. 192.168.100.73/24
        let candidate = inet.split('/').next().unwrap_or(&inet);
        if let Ok(ip) = candidate.parse::<Ipv4Addr>() {
            if !ip.is_unspecified() {
                return Ok(Some(ip.to_string()));
            }
        }
    }
    Ok(None)
}

async fn vm_address<N: InstanceNetwork + ?Sized>(
    network: &N,
    vm_id: u32,
) -> Result<Option<String>, PlatformError> {
    // The guest agent answers with an error until it is up; that is
    // "not ready", not a failure.
    let interfaces = match network.qemu_agent_interfaces(vm_id).await {
        Ok(interfaces) => interfaces,
        Err(err) => {
            debug!("guest agent not ready for instance {}: {}", vm_id, err);
            return Ok(None);
        }
    };

    for interface in interfaces {
        if !PRIMARY_INTERFACES.contains(&interface.name.as_str()) {
            continue;
        }
        for address in interface.addresses {
            if address.kind != "ipv4" {
                continue;
            }
            if let Ok(ip) = address.address.parse::<Ipv4Addr>() {
                if !ip.is_loopback() {
                    return Ok(Some(ip.to_string()));
                }
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::proxmox::{AgentAddress, AgentInterface, GuestInterface};

    /// Yields no address until `ready_after` queries have been made
    struct SlowGuest {
        queries: AtomicU32,
        ready_after: u32,
        address: &'static str,
    }

    impl SlowGuest {
        fn new(ready_after: u32, address: &'static str) -> Self {
            Self {
                queries: AtomicU32::new(0),
                ready_after,
                address,
            }
        }

        fn queries(&self) -> u32 {
            self.queries.load(Ordering::SeqCst)
        }

        fn ready(&self) -> bool {
            self.queries.fetch_add(1, Ordering::SeqCst) + 1 >= self.ready_after
        }
    }

    #[async_trait]
    impl InstanceNetwork for SlowGuest {
        async fn lxc_interfaces(&self, _vmid: u32) -> Result<Vec<GuestInterface>, PlatformError> {
            if self.ready() {
                Ok(vec![GuestInterface {
                    name: "eth0".to_string(),
                    inet: Some(format!("{}/24", self.address)),
                }])
            } else {
                Ok(vec![GuestInterface {
                    name: "eth0".to_string(),
                    inet: Some("0.0.0.0/32".to_string()),
                }])
            }
        }

        async fn qemu_agent_interfaces(
            &self,
            _vmid: u32,
        ) -> Result<Vec<AgentInterface>, PlatformError> {
            if self.ready() {
                Ok(vec![
                    AgentInterface {
                        name: "lo".to_string(),
                        addresses: vec![AgentAddress {
                            address: "127.0.0.1".to_string(),
                            kind: "ipv4".to_string(),
                        }],
                    },
                    AgentInterface {
                        name: "ens18".to_string(),
                        addresses: vec![
                            AgentAddress {
                                address: "fe80::1".to_string(),
                                kind: "ipv6".to_string(),
                            },
                            AgentAddress {
                                address: self.address.to_string(),
                                kind: "ipv4".to_string(),
                            },
                        ],
                    },
                ])
            } else {
                Err(PlatformError::ProxmoxError("agent not running".to_string()))
            }
        }
    }

    async fn no_sleep(_d: Duration) {}

    #[tokio::test]
    async fn container_address_found_on_fourth_attempt() {
        let guest = SlowGuest::new(4, "192.168.100.73");
        let address =
            resolve_address(&guest, DeploymentKind::Lxc, 150, 10, no_sleep).await.unwrap();
        assert_eq!(address, "192.168.100.73");
        assert_eq!(guest.queries(), 4);
    }

    #[tokio::test]
    async fn vm_agent_errors_count_as_not_ready() {
        let guest = SlowGuest::new(3, "192.168.100.91");
        let address =
            resolve_address(&guest, DeploymentKind::Vm, 151, 10, no_sleep).await.unwrap();
        assert_eq!(address, "192.168.100.91");
        assert_eq!(guest.queries(), 3);
    }

    #[tokio::test]
    async fn exhaustion_is_an_error() {
        let guest = SlowGuest::new(u32::MAX, "10.0.0.1");
        let err = resolve_address(&guest, DeploymentKind::Lxc, 152, 10, no_sleep)
            .await
            .unwrap_err();
        match err {
            PlatformError::AddressUnresolved { vm_id, attempts } => {
                assert_eq!(vm_id, 152);
                assert_eq!(attempts, 10);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(guest.queries(), 10);
    }
}
