use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use sysinfo::{Components, Disks, Networks, System};

use super::args::CallArgs;
use crate::error::{BridgeError, Result};

/// Host statistics reported by the `pi` module.
pub trait SystemStats: Send + Sync {
    /// IPv4 address of the wireless interface, or an empty string.
    fn ip_address(&self) -> anyhow::Result<String>;

    /// CPU temperature in °C, 0 if no sensor is known.
    fn cpu_temp(&self) -> anyhow::Result<f64>;

    /// CPU utilisation since the previous call, percent.
    fn cpu_percent(&self) -> anyhow::Result<f64>;

    fn ram_percent_used(&self) -> anyhow::Result<f64>;

    /// Usage of the root filesystem, percent.
    fn disk_percent(&self) -> anyhow::Result<f64>;
}

const PREFERRED_INTERFACE: &str = "wlan0";
const CPU_SENSORS: [&str; 2] = ["cpu_thermal", "coretemp"];

pub struct SysinfoStats {
    system: Mutex<System>,
}

impl SysinfoStats {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemStats for SysinfoStats {
    fn ip_address(&self) -> anyhow::Result<String> {
        let networks = Networks::new_with_refreshed_list();
        let mut wireless: Vec<_> = networks
            .iter()
            .filter(|(name, _)| name.starts_with("wl"))
            .collect();
        wireless.sort_by_key(|(name, _)| name.as_str() != PREFERRED_INTERFACE);

        let address = wireless.first().and_then(|(_, data)| {
            data.ip_networks()
                .iter()
                .find_map(|network| match network.addr {
                    IpAddr::V4(v4) => Some(v4.to_string()),
                    IpAddr::V6(_) => None,
                })
        });
        Ok(address.unwrap_or_default())
    }

    fn cpu_temp(&self) -> anyhow::Result<f64> {
        let components = Components::new_with_refreshed_list();
        for sensor in CPU_SENSORS {
            for component in components.iter() {
                if component.label().contains(sensor) {
                    let temperature: Option<f32> = component.temperature().into();
                    if let Some(celsius) = temperature {
                        return Ok(f64::from(celsius));
                    }
                }
            }
        }
        Ok(0.0)
    }

    fn cpu_percent(&self) -> anyhow::Result<f64> {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        Ok(f64::from(system.global_cpu_usage()))
    }

    fn ram_percent_used(&self) -> anyhow::Result<f64> {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            anyhow::bail!("total memory reported as zero");
        }
        Ok(system.used_memory() as f64 * 100.0 / total as f64)
    }

    fn disk_percent(&self) -> anyhow::Result<f64> {
        let disks = Disks::new_with_refreshed_list();
        let root = disks
            .iter()
            .find(|disk| disk.mount_point() == std::path::Path::new("/"))
            .ok_or_else(|| anyhow::anyhow!("no filesystem mounted at /"))?;
        let total = root.total_space();
        if total == 0 {
            anyhow::bail!("root filesystem reports zero size");
        }
        let used = total.saturating_sub(root.available_space());
        Ok(used as f64 * 100.0 / total as f64)
    }
}

pub struct PiService {
    stats: Option<Arc<dyn SystemStats>>,
}

impl PiService {
    pub fn new(stats: Option<Arc<dyn SystemStats>>) -> Self {
        Self { stats }
    }

    pub async fn dispatch(&self, method: &str, args: CallArgs) -> Result<Option<Value>> {
        let read: fn(&dyn SystemStats) -> anyhow::Result<Value> = match method {
            "ip_address" => |s| s.ip_address().map(Value::from),
            "cpu_temp" => |s| s.cpu_temp().map(Value::from),
            "cpu_percent" => |s| s.cpu_percent().map(Value::from),
            "ram_percent_used" => |s| s.ram_percent_used().map(Value::from),
            "disk_percent" => |s| s.disk_percent().map(Value::from),
            _ => return Ok(None),
        };
        args.finish()?;

        let stats = self
            .stats
            .clone()
            .ok_or_else(|| BridgeError::Unavailable("system statistics".to_string()))?;
        let method = method.to_string();
        let value = tokio::task::spawn_blocking(move || read(stats.as_ref()))
            .await
            .map_err(|e| BridgeError::Unavailable(format!("system statistics ({})", e)))?
            .map_err(|e| BridgeError::Unavailable(format!("pi.{} ({})", method, e)))?;
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Arguments;

    struct Fixed;

    impl SystemStats for Fixed {
        fn ip_address(&self) -> anyhow::Result<String> {
            Ok("192.168.1.20".into())
        }
        fn cpu_temp(&self) -> anyhow::Result<f64> {
            Ok(48.5)
        }
        fn cpu_percent(&self) -> anyhow::Result<f64> {
            Ok(12.0)
        }
        fn ram_percent_used(&self) -> anyhow::Result<f64> {
            Ok(40.0)
        }
        fn disk_percent(&self) -> anyhow::Result<f64> {
            anyhow::bail!("no disk")
        }
    }

    #[tokio::test]
    async fn delegates_to_the_collaborator() {
        let pi = PiService::new(Some(Arc::new(Fixed)));
        let temp = pi
            .dispatch("cpu_temp", CallArgs::new("cpu_temp", Arguments::new()))
            .await
            .unwrap();
        assert_eq!(temp, Some(Value::from(48.5)));

        let err = pi
            .dispatch("disk_percent", CallArgs::new("disk_percent", Arguments::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Unavailable(_)));
    }

    #[tokio::test]
    async fn missing_collaborator_is_unavailable() {
        let pi = PiService::new(None);
        let err = pi
            .dispatch("ip_address", CallArgs::new("ip_address", Arguments::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Unavailable");
        assert!(pi
            .dispatch("get_fields", CallArgs::new("get_fields", Arguments::new()))
            .await
            .unwrap()
            .is_none());
    }
}
