use std::sync::atomic::{
    AtomicUsize,
    Ordering,
};

use async_trait::async_trait;
use dashmap::DashMap;
use lxp_commons::{
    Device,
    Instance,
};
use tracing::debug;

use crate::error::{
    DriverError,
    DriverResult,
};
use crate::traits::{
    ExecResult,
    HostDriver,
    InstanceState,
};

/// In-process fake `HostDriver`, grounded on
/// `SharedClientManager`'s `DashMap`-backed cache: instances keyed by
/// name, `location` assigned round-robin over a small node table,
/// `devices` fabricated from the spec's `ports` array as
/// `tcp:127.0.0.1:<port>` proxy devices so downstream port accounting
/// has something real to chew on.
pub struct InMemoryDriver {
    instances: DashMap<String, Instance>,
    nodes: Vec<String>,
    next_node: AtomicUsize,
}

impl InMemoryDriver {
    pub fn new(nodes: Vec<String>) -> Self {
        Self {
            instances: DashMap::new(),
            nodes,
            next_node: AtomicUsize::new(0),
        }
    }

    fn next_location(&self) -> String {
        if self.nodes.is_empty() {
            return "local".to_string();
        }
        let idx = self.next_node.fetch_add(1, Ordering::Relaxed) % self.nodes.len();
        self.nodes[idx].clone()
    }
}

#[async_trait]
impl HostDriver for InMemoryDriver {
    async fn create(&self, spec: serde_json::Value) -> DriverResult<Instance> {
        let name = spec
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DriverError::Create("spec missing 'name'".to_string()))?
            .to_string();

        if self.instances.contains_key(&name) {
            return Err(DriverError::Create(format!("instance '{name}' already exists")));
        }

        let ports: Vec<u16> = spec
            .get("ports")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|p| p.as_u64()).map(|p| p as u16).collect())
            .unwrap_or_default();

        let config: std::collections::HashMap<String, String> = spec
            .get("config")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let mut devices = std::collections::HashMap::new();
        for (i, port) in ports.iter().enumerate() {
            devices.insert(
                format!("proxy{i}"),
                Device {
                    device_type: "proxy".to_string(),
                    listen: Some(format!("tcp:127.0.0.1:{port}")),
                    connect: Some(format!("tcp:127.0.0.1:{port}")),
                    extra: std::collections::HashMap::new(),
                },
            );
        }

        let instance = Instance {
            id: None,
            name: name.clone(),
            instance_type: spec
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("container")
                .to_string(),
            status: Some("Running".to_string()),
            control: Some(true),
            location: Some(self.next_location()),
            template: None,
            devices: Some(devices),
            config: Some(config),
            services: None,
        };

        debug!(instance = %name, location = ?instance.location, "created fake instance");
        self.instances.insert(name, instance.clone());
        Ok(instance)
    }

    async fn start(&self, name: &str) -> DriverResult<()> {
        let mut entry = self
            .instances
            .get_mut(name)
            .ok_or_else(|| DriverError::NotFound(name.to_string()))?;
        entry.status = Some("Running".to_string());
        Ok(())
    }

    async fn restart(&self, name: &str) -> DriverResult<()> {
        let mut entry = self
            .instances
            .get_mut(name)
            .ok_or_else(|| DriverError::NotFound(name.to_string()))?;
        entry.status = Some("Running".to_string());
        Ok(())
    }

    async fn status(&self, name: &str) -> DriverResult<InstanceState> {
        let entry = self
            .instances
            .get(name)
            .ok_or_else(|| DriverError::NotFound(name.to_string()))?;
        Ok(InstanceState {
            status: entry.status.clone().unwrap_or_else(|| "Unknown".to_string()),
        })
    }

    async fn get(&self, name: &str) -> DriverResult<Instance> {
        self.instances
            .get(name)
            .map(|e| e.clone())
            .ok_or_else(|| DriverError::NotFound(name.to_string()))
    }

    async fn list(&self) -> DriverResult<Vec<Instance>> {
        Ok(self.instances.iter().map(|e| e.value().clone()).collect())
    }

    async fn update_device(&self, name: &str, device_name: &str, device: Device) -> DriverResult<()> {
        let mut entry = self
            .instances
            .get_mut(name)
            .ok_or_else(|| DriverError::NotFound(name.to_string()))?;
        entry
            .devices
            .get_or_insert_with(std::collections::HashMap::new)
            .insert(device_name.to_string(), device);
        Ok(())
    }

    async fn save(&self, instance: &Instance) -> DriverResult<()> {
        if !self.instances.contains_key(&instance.name) {
            return Err(DriverError::Save(format!("instance '{}' not found", instance.name)));
        }
        self.instances.insert(instance.name.clone(), instance.clone());
        Ok(())
    }

    async fn execute(&self, name: &str, argv: &[String]) -> DriverResult<ExecResult> {
        if !self.instances.contains_key(name) {
            return Err(DriverError::NotFound(name.to_string()));
        }
        Ok(ExecResult {
            exit_code: 0,
            stdout: argv.join(" "),
            stderr: String::new(),
        })
    }
}
