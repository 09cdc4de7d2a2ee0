mod errors;

use std::collections::HashSet;
use std::sync::Arc;

use lxp_allocator::PortAllocator;
use lxp_commons::{
    config::ProvisionerConfig,
    CreateMessage,
    Environment,
    EnvironmentStatus,
    InstanceStatusMessage,
    OperationMessage,
    ProvisionerError,
    ProvisionerResult,
};
use lxp_driver::HostDriver;
use lxp_kv::KvStore;
use lxp_templates::TemplateStore;
use tracing::{
    info,
    warn,
};

use crate::errors::{
    allocator_err,
    driver_err,
    template_err,
};

const ID_ALPHABET: [char; 64] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I',
    'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', '_', 'a',
    'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't',
    'u', 'v', 'w', 'x', 'y', 'z', '-',
];
const ID_LENGTH: usize = 16;

/// Composes the port allocator, template store, and host driver into the
/// create/operate pipelines. Generic over `K`/`D` the way the rest of the
/// crate substitutes fakes for real backends — `InMemoryStore`/
/// `InMemoryDriver` in tests, `EtcdStore`/a real driver in production.
pub struct InstanceService<K: KvStore, D: HostDriver> {
    allocator: Arc<PortAllocator<K>>,
    driver: Arc<D>,
    templates: Arc<TemplateStore>,
    config: Arc<ProvisionerConfig>,
}

impl<K: KvStore, D: HostDriver> InstanceService<K, D> {
    pub fn new(
        allocator: Arc<PortAllocator<K>>, driver: Arc<D>, templates: Arc<TemplateStore>,
        config: Arc<ProvisionerConfig>,
    ) -> Self {
        Self {
            allocator,
            driver,
            templates,
            config,
        }
    }

    /// Owner check for non-create operations: true for an admin user, or
    /// when the instance's `environment.LX_USER` config value matches.
    /// A missing instance is surfaced as `NotFound`, not a denial.
    async fn permission(&self, name: &str, user: &str) -> ProvisionerResult<bool> {
        if self.config.is_admin(user) {
            return Ok(true);
        }

        let instance = self.driver.get(name).await.map_err(driver_err)?;
        Ok(instance.config_value("environment.LX_USER") == Some(user))
    }

    fn generate_id(&self) -> String {
        nanoid::nanoid!(ID_LENGTH, &ID_ALPHABET)
    }

    async fn allocated_ports(&self) -> ProvisionerResult<HashSet<u16>> {
        let instances = self.driver.list().await.map_err(driver_err)?;
        Ok(instances.iter().flat_map(|i| i.tcp_proxy_ports()).collect())
    }

    async fn release_all_best_effort(&self, ports: &[u16]) {
        for &port in ports {
            if let Err(e) = self.allocator.release_pending(port).await {
                warn!(port, error = %e, "failed to release pending port during compensation");
            }
        }
    }

    /// Runs the 10-step create pipeline. `user` is the caller identity
    /// from the envelope.
    pub async fn create(&self, message: CreateMessage, user: &str) -> ProvisionerResult<Environment> {
        let mut environment = message.environment;

        // 1. Authorize: admin bypass aside, caller must match the owner
        // named on the environment itself.
        if !self.config.is_admin(user) && environment.user.username != user {
            return Err(ProvisionerError::PermissionDenied { user: user.to_string() });
        }

        // 2. Assign id.
        environment.instance.id = Some(self.generate_id());

        // 3. Resolve template.
        let template_name = match environment.instance.template.clone() {
            Some(name) => name,
            None => environment
                .course_template_name()
                .ok_or_else(|| ProvisionerError::TemplateNotFound("<no template or course>".to_string()))?,
        };
        let template = self
            .templates
            .get(&template_name)
            .cloned()
            .ok_or_else(|| ProvisionerError::TemplateNotFound(template_name.clone()))?;

        // 4. Reserve ports.
        let needed = template.ports.unwrap_or(0) as usize;
        let mut ports = Vec::new();
        if needed > 0 {
            let allocated = self.allocated_ports().await?;
            let now = chrono::Utc::now().timestamp();
            let reserved = self
                .allocator
                .reserve(needed, &allocated, now)
                .await
                .map_err(allocator_err)?;

            if reserved.len() < needed {
                self.release_all_best_effort(&reserved).await;
                return Err(ProvisionerError::ResourceExhausted {
                    requested: needed,
                    available: reserved.len(),
                });
            }
            ports = reserved;
        }

        // 5. Render spec.
        let context = serde_json::json!({ "environment": &environment, "ports": &ports });
        let spec = self
            .templates
            .render(&template_name, &context)
            .map_err(|e| {
                warn!(template = %template_name, error = %e, "compensating: releasing reserved ports after render failure");
                e
            })
            .map_err(template_err)?;

        let spec = match spec {
            serde_json::Value::Object(_) => spec,
            other => {
                self.release_all_best_effort(&ports).await;
                return Err(ProvisionerError::TemplateRenderError(format!(
                    "{template_name}: rendered spec is not a JSON object: {other}"
                )));
            }
        };

        // 6. Create.
        let mut instance = match self.driver.create(spec).await {
            Ok(instance) => instance,
            Err(e) => {
                self.release_all_best_effort(&ports).await;
                return Err(driver_err(e));
            }
        };

        // 7. Rewrite proxy listen addresses to the node's configured
        // address, then save once.
        let location = instance.location.clone().unwrap_or_default();
        let node = match self.config.nodes.get(&location) {
            Some(node) => node.clone(),
            None => {
                warn!(%location, instance = %instance.name, "unknown node for created instance, left in place");
                self.release_all_best_effort(&ports).await;
                return Err(ProvisionerError::DriverError(format!(
                    "no configured node for location '{location}'"
                )));
            }
        };

        if let Some(devices) = instance.devices.clone() {
            for (device_name, mut device) in devices {
                if !device.is_tcp_proxy() {
                    continue;
                }
                device.rewrite_tcp_host(&node.address);
                if let Some(map) = instance.devices.as_mut() {
                    map.insert(device_name.clone(), device.clone());
                }
                if let Err(e) = self.driver.update_device(&instance.name, &device_name, device).await {
                    warn!(instance = %instance.name, error = %e, "device rewrite failed, instance left in place");
                    self.release_all_best_effort(&ports).await;
                    return Err(driver_err(e));
                }
            }
        }

        if let Err(e) = self.driver.save(&instance).await {
            warn!(instance = %instance.name, error = %e, "save failed, instance left in place");
            self.release_all_best_effort(&ports).await;
            return Err(driver_err(e));
        }

        // 8. Post-commands.
        for command in &template.commands {
            let rendered = match self.templates.render_list(command, &context) {
                Ok(rendered) => rendered,
                Err(e) => {
                    self.release_all_best_effort(&ports).await;
                    return Err(template_err(e));
                }
            };

            match self.driver.execute(&instance.name, &rendered).await {
                Ok(result) if result.exit_code != 0 => {
                    warn!(
                        instance = %instance.name,
                        command = ?rendered,
                        exit_code = result.exit_code,
                        stderr = %result.stderr,
                        "post-create command exited non-zero, continuing"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        instance = %instance.name,
                        error = %e,
                        "post-create command failed to execute, no delete attempted (no destroy op on HostDriver)"
                    );
                    self.release_all_best_effort(&ports).await;
                    return Err(driver_err(e));
                }
            }
        }

        // 9. Release pending: the ports now live on a live instance's
        // devices, so they belong in `allocated`, not `pending`.
        for &port in &ports {
            self.allocator.release_pending(port).await.map_err(allocator_err)?;
        }

        // 10. Return the enriched environment.
        environment.instance.location = Some(node.name.clone());
        environment.instance.devices = instance.devices;
        environment.instance.status = Some(String::new());

        info!(instance = %environment.instance.name, id = ?environment.instance.id, "instance created");
        Ok(environment)
    }

    /// Runs the operate pipeline: authorize, whitelist the operation,
    /// execute, and return a status record.
    pub async fn operate(&self, message: OperationMessage, user: &str) -> ProvisionerResult<InstanceStatusMessage> {
        if !self.permission(&message.instance, user).await? {
            return Err(ProvisionerError::PermissionDenied { user: user.to_string() });
        }

        if !message.operation.is_allowed() {
            return Err(ProvisionerError::InvalidOperation(message.operation.to_string()));
        }

        if message.operation == lxp_commons::OperationsEnum::Restart {
            self.driver.restart(&message.instance).await.map_err(driver_err)?;
        }

        let instance = self.driver.get(&message.instance).await.map_err(driver_err)?;
        let state = self.driver.status(&message.instance).await.map_err(driver_err)?;

        Ok(InstanceStatusMessage {
            id: instance.config_value("environment.LX_INSTANCE_ID").unwrap_or_default().to_string(),
            message_type: "instance_status".to_string(),
            name: instance.name.clone(),
            status: state.status,
            environment: EnvironmentStatus {
                id: instance.config_value("environment.LX_ENV_ID").unwrap_or_default().to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lxp_commons::{
        Course,
        Instance,
        OperationsEnum,
        User,
    };
    use lxp_driver::InMemoryDriver;
    use lxp_kv::InMemoryStore;

    use super::*;

    fn write_template(dir: &std::path::Path, file_name: &str, contents: &str) {
        std::fs::write(dir.join(file_name), contents).unwrap();
    }

    fn test_config() -> ProvisionerConfig {
        let mut nodes = std::collections::HashMap::new();
        nodes.insert(
            "node-a".to_string(),
            lxp_commons::config::NodeConfig {
                name: "node-a".to_string(),
                address: "10.0.0.5".to_string(),
            },
        );
        ProvisionerConfig {
            etcd_host: "localhost".to_string(),
            etcd_port: 2379,
            etcd_user: None,
            etcd_password: None,
            port_range_start: 9000,
            port_range_end: 9010,
            nodes,
            admin_users: vec!["admin".to_string()],
            template_dir: "templates".to_string(),
            lock_name: "port-pool".to_string(),
            lock_timeout_secs: 5,
        }
    }

    fn environment(username: &str) -> Environment {
        Environment {
            id: "env-1".to_string(),
            name: "env".to_string(),
            environment_type: "simple".to_string(),
            instance: Instance {
                name: "box1".to_string(),
                ..Default::default()
            },
            user: User {
                id: "u1".to_string(),
                uid_number: "1000".to_string(),
                username: username.to_string(),
            },
            course: Some(Course {
                subject: Some("cs".to_string()),
                catalog_number: Some("135".to_string()),
                semester: Some("f23".to_string()),
            }),
        }
    }

    fn service(dir: &std::path::Path) -> InstanceService<InMemoryStore, InMemoryDriver> {
        let templates = TemplateStore::load(dir).unwrap();
        let kv = Arc::new(InMemoryStore::new());
        let allocator = Arc::new(PortAllocator::new(kv, "port-pool", Duration::from_secs(1), (9000, 9010)));
        let driver = Arc::new(InMemoryDriver::new(vec!["node-a".to_string()]));
        InstanceService::new(allocator, driver, Arc::new(templates), Arc::new(test_config()))
    }

    #[tokio::test]
    async fn create_rejects_non_owner_non_admin_caller() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());

        let err = svc
            .create(CreateMessage { environment: environment("alice") }, "mallory")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionerError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn create_succeeds_end_to_end_with_ports_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        write_template(
            dir.path(),
            "cs135-f23.json.tera",
            r#"{
                "template": {"name": "cs135-f23", "ports": 1, "commands": [["echo", "{{ environment.instance.name }}"]]},
                "name": "{{ environment.instance.name }}",
                "ports": {{ ports }},
                "config": {"environment.LX_USER": "{{ environment.user.username }}", "environment.LX_INSTANCE_ID": "{{ environment.instance.id }}", "environment.LX_ENV_ID": "{{ environment.id }}"}
            }"#,
        );
        let svc = service(dir.path());

        let result = svc
            .create(CreateMessage { environment: environment("alice") }, "alice")
            .await
            .unwrap();

        assert_eq!(result.instance.location.as_deref(), Some("node-a"));
        let devices = result.instance.devices.unwrap();
        let device = devices.values().next().unwrap();
        assert_eq!(device.listen.as_deref(), Some("tcp:10.0.0.5:9000"));

        let pending = svc.allocator.pending_snapshot().await.unwrap();
        assert!(pending.is_empty(), "reserved port should have been released to allocated");
    }

    #[tokio::test]
    async fn create_releases_ports_when_template_missing() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());

        let mut env = environment("alice");
        env.instance.template = Some("does-not-exist".to_string());

        let err = svc
            .create(CreateMessage { environment: env }, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionerError::TemplateNotFound(_)));
    }

    #[tokio::test]
    async fn operate_rejects_disallowed_operation() {
        let dir = tempfile::tempdir().unwrap();
        write_template(
            dir.path(),
            "cs135-f23.json.tera",
            r#"{
                "template": {"name": "cs135-f23"},
                "name": "{{ environment.instance.name }}",
                "config": {"environment.LX_USER": "{{ environment.user.username }}"}
            }"#,
        );
        let svc = service(dir.path());
        svc.create(CreateMessage { environment: environment("alice") }, "alice").await.unwrap();

        let err = svc
            .operate(
                OperationMessage {
                    username: "alice".to_string(),
                    instance: "box1".to_string(),
                    operation: OperationsEnum::Start,
                },
                "alice",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionerError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn operate_status_reads_owner_from_config() {
        let dir = tempfile::tempdir().unwrap();
        write_template(
            dir.path(),
            "cs135-f23.json.tera",
            r#"{
                "template": {"name": "cs135-f23"},
                "name": "{{ environment.instance.name }}",
                "config": {"environment.LX_USER": "{{ environment.user.username }}", "environment.LX_INSTANCE_ID": "{{ environment.instance.id }}", "environment.LX_ENV_ID": "{{ environment.id }}"}
            }"#,
        );
        let svc = service(dir.path());
        svc.create(CreateMessage { environment: environment("alice") }, "alice").await.unwrap();

        let status = svc
            .operate(
                OperationMessage {
                    username: "alice".to_string(),
                    instance: "box1".to_string(),
                    operation: OperationsEnum::Status,
                },
                "alice",
            )
            .await
            .unwrap();
        assert_eq!(status.name, "box1");
        assert_eq!(status.environment.id, "env-1");

        let err = svc
            .operate(
                OperationMessage {
                    username: "alice".to_string(),
                    instance: "box1".to_string(),
                    operation: OperationsEnum::Status,
                },
                "mallory",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionerError::PermissionDenied { .. }));
    }
}
