use std::collections::HashMap;

use serde::{
    Deserialize,
    Serialize,
};

/// A device attached to an instance. Only `type == "proxy"` devices carry a
/// `listen` address the allocator cares about; everything else (disks, nics)
/// round-trips through `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Device {
    #[serde(rename = "type")]
    pub device_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect: Option<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Device {
    pub fn is_proxy(&self) -> bool {
        self.device_type == "proxy"
    }

    /// `true` for a proxy device whose `listen` string begins `tcp:`.
    ///
    /// Applies the predicate to `listen`, not to the device map itself —
    /// the original implementation sometimes checked `startswith('tcp')`
    /// against the device dict, which would never match; this is the
    /// corrected behavior spec.md calls out as a normalization.
    pub fn is_tcp_proxy(&self) -> bool {
        self.is_proxy()
            && self
                .listen
                .as_deref()
                .is_some_and(|l| l.starts_with("tcp:"))
    }

    /// The port of a `tcp:<address>:<port>` listen string, if parseable.
    pub fn tcp_port(&self) -> Option<u16> {
        if !self.is_tcp_proxy() {
            return None;
        }
        self.listen.as_deref()?.split(':').nth(2)?.parse().ok()
    }

    /// Rewrites the host portion of a `tcp:<address>:<port>` listen string.
    pub fn rewrite_tcp_host(&mut self, new_host: &str) -> bool {
        let Some(listen) = self.listen.as_deref() else {
            return false;
        };
        let mut parts: Vec<&str> = listen.splitn(3, ':').collect();
        if parts.len() != 3 || parts[0] != "tcp" {
            return false;
        }
        parts[1] = new_host;
        self.listen = Some(parts.join(":"));
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub display_name: String,
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Instance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub name: String,

    #[serde(rename = "type", default)]
    pub instance_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<HashMap<String, Device>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<HashMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<ServiceEntry>>,
}

impl Instance {
    /// Address portion (everything after the first `:`) of a named proxy
    /// device's `listen` string, if it's a `tcp:` proxy. Mirrors
    /// `Instance.get_listen_address` from the Python original.
    pub fn get_listen_address(&self, device_name: &str) -> Option<String> {
        let device = self.devices.as_ref()?.get(device_name)?;
        let listen = device.listen.as_deref()?;
        listen.strip_prefix("tcp:").map(str::to_string)
    }

    /// All `tcp:` proxy device ports on this instance.
    pub fn tcp_proxy_ports(&self) -> Vec<u16> {
        let Some(devices) = &self.devices else {
            return Vec::new();
        };
        devices.values().filter_map(Device::tcp_port).collect()
    }

    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.as_ref()?.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy_device(listen: &str) -> Device {
        Device {
            device_type: "proxy".into(),
            listen: Some(listen.into()),
            connect: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn tcp_proxy_detection_reads_listen_not_device() {
        let mut devices = HashMap::new();
        devices.insert("ttyd".to_string(), proxy_device("tcp:127.0.0.1:9001"));
        devices.insert(
            "udp0".to_string(),
            proxy_device("udp:127.0.0.1:9002"),
        );

        let instance = Instance {
            devices: Some(devices),
            ..Default::default()
        };

        let ports = instance.tcp_proxy_ports();
        assert_eq!(ports, vec![9001]);
    }

    #[test]
    fn get_listen_address_strips_tcp_prefix() {
        let mut devices = HashMap::new();
        devices.insert("ttyd".to_string(), proxy_device("tcp:10.0.0.5:9001"));
        let instance = Instance {
            devices: Some(devices),
            ..Default::default()
        };

        assert_eq!(
            instance.get_listen_address("ttyd"),
            Some("10.0.0.5:9001".to_string())
        );
        assert_eq!(instance.get_listen_address("missing"), None);
    }

    #[test]
    fn rewrite_tcp_host_replaces_second_field() {
        let mut device = proxy_device("tcp:127.0.0.1:9001");
        assert!(device.rewrite_tcp_host("10.1.2.3"));
        assert_eq!(device.listen.as_deref(), Some("tcp:10.1.2.3:9001"));
    }

    #[test]
    fn rewrite_tcp_host_leaves_udp_devices_alone() {
        let mut device = proxy_device("udp:127.0.0.1:9001");
        assert!(!device.rewrite_tcp_host("10.1.2.3"));
        assert_eq!(device.listen.as_deref(), Some("udp:127.0.0.1:9001"));
    }
}
