//! Device discovery and stream setup documents.
//!
//! Discovery is delegated to the vendor's helper executable, which prints a
//! JSON listing of the devices it found on the network. The stream setup
//! document is what a device's configuration service reports for its
//! streaming interface.

use std::ffi::OsStr;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{Result, TelemetryError};

/// One device reported by the discovery helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    pub device_name: String,
    pub device_ip: String,
}

/// Output of the discovery helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDiscovery {
    /// Older helper builds spell this `numberOfentries`.
    #[serde(alias = "numberOfentries")]
    pub number_of_entries: usize,
    #[serde(default)]
    pub entries: Vec<DeviceEntry>,
}

impl DeviceDiscovery {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TelemetryError::Discovery {
            reason: format!("unreadable discovery output: {}", e),
        })
    }

    /// Addresses of the first `number_of_entries` devices.
    pub fn ip_addresses(&self) -> Result<Vec<IpAddr>> {
        if self.number_of_entries > self.entries.len() {
            warn!(
                "Discovery reported {} devices but listed {}",
                self.number_of_entries,
                self.entries.len()
            );
        }

        self.entries
            .iter()
            .take(self.number_of_entries)
            .map(|entry| {
                entry.device_ip.trim().parse().map_err(|_| TelemetryError::Discovery {
                    reason: format!(
                        "device {} reported invalid address {:?}",
                        entry.device_name, entry.device_ip
                    ),
                })
            })
            .collect()
    }
}

/// Run the discovery helper and parse what it prints.
pub async fn discover_devices(program: impl AsRef<OsStr>) -> Result<DeviceDiscovery> {
    discover_devices_with_args(program, std::iter::empty::<&OsStr>()).await
}

pub async fn discover_devices_with_args<I, A>(
    program: impl AsRef<OsStr>,
    args: I,
) -> Result<DeviceDiscovery>
where
    I: IntoIterator<Item = A>,
    A: AsRef<OsStr>,
{
    let program = program.as_ref();
    debug!("Running device discovery: {:?}", program);

    let output = Command::new(program).args(args).kill_on_drop(true).output().await.map_err(
        |e| TelemetryError::Discovery {
            reason: format!("cannot run {:?}: {}", program, e),
        },
    )?;

    if !output.status.success() {
        return Err(TelemetryError::Discovery {
            reason: format!(
                "{:?} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let discovery = DeviceDiscovery::from_json(&String::from_utf8_lossy(&output.stdout))?;
    info!("Discovered {} devices", discovery.number_of_entries);
    Ok(discovery)
}

/// Streaming interface of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSetup {
    pub ip_addresses: Vec<String>,
    pub tcp_port: u16,
}

impl StreamSetup {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| TelemetryError::config(format!("invalid stream setup: {}", e)))
    }

    /// Socket address of the first listed interface.
    pub fn endpoint(&self) -> Result<SocketAddr> {
        let ip = self
            .ip_addresses
            .first()
            .ok_or_else(|| TelemetryError::config("stream setup lists no IP address"))?;
        let ip: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| TelemetryError::config(format!("invalid stream address {:?}", ip)))?;
        Ok(SocketAddr::new(ip, self.tcp_port))
    }
}
