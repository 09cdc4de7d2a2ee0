mod adapter;
mod error;
#[cfg(any(test, feature = "test-util"))]
mod in_memory;
mod traits;

pub use adapter::BusAdapter;
pub use error::{
    TransportError,
    TransportResult,
};
#[cfg(any(test, feature = "test-util"))]
pub use in_memory::InMemoryTransport;
pub use traits::{
    AckToken,
    RawDelivery,
    Transport,
};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use lxp_commons::{
        config::{
            NodeConfig,
            ProvisionerConfig,
        },
        Course,
        Environment,
        Instance,
        MessageTypeEnum,
        User,
    };
    use lxp_driver::InMemoryDriver;
    use lxp_kv::InMemoryStore;
    use lxp_service::InstanceService;
    use lxp_templates::TemplateStore;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn test_config() -> ProvisionerConfig {
        let mut nodes = std::collections::HashMap::new();
        nodes.insert(
            "node-a".to_string(),
            NodeConfig {
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

    fn environment(name: &str, username: &str) -> Environment {
        Environment {
            id: "env-1".to_string(),
            name: "env".to_string(),
            environment_type: "simple".to_string(),
            instance: Instance {
                name: name.to_string(),
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

    fn write_template(dir: &std::path::Path, file_name: &str, contents: &str) {
        std::fs::write(dir.join(file_name), contents).unwrap();
    }

    fn service(dir: &std::path::Path) -> InstanceService<InMemoryStore, InMemoryDriver> {
        let templates = TemplateStore::load(dir).unwrap();
        let kv = Arc::new(InMemoryStore::new());
        let allocator = Arc::new(lxp_allocator::PortAllocator::new(
            kv,
            "port-pool",
            Duration::from_secs(1),
            (9000, 9010),
        ));
        let driver = Arc::new(InMemoryDriver::new(vec!["node-a".to_string()]));
        InstanceService::new(allocator, driver, Arc::new(templates), Arc::new(test_config()))
    }

    fn create_delivery(transport: &InMemoryTransport, environment: Environment, user: &str) -> RawDelivery {
        RawDelivery {
            headers: serde_json::json!({"x-type": "CREATE", "x-user": user, "x-source": "tests", "x-application": "lxp"}),
            content_type: "application/json".to_string(),
            reply_to: None,
            correlation_id: Some("corr-1".to_string()),
            user_id: Some(user.to_string()),
            body: serde_json::json!({"environment": environment}),
            ack: transport.next_ack_token(),
        }
    }

    #[tokio::test]
    async fn create_dispatch_replies_and_publishes_instance_creation() {
        let dir = tempfile::tempdir().unwrap();
        write_template(
            dir.path(),
            "cs135-f23.json.tera",
            r#"{
                "template": {"name": "cs135-f23", "ports": 1},
                "name": "{{ environment.instance.name }}",
                "ports": {{ ports }},
                "config": {"environment.LX_USER": "{{ environment.user.username }}"}
            }"#,
        );

        let svc = Arc::new(service(dir.path()));
        let transport = Arc::new(InMemoryTransport::new());
        let adapter = BusAdapter::new(svc, Arc::clone(&transport));

        let delivery = create_delivery(&transport, environment("box1", "alice"), "alice");
        transport.enqueue(delivery);

        adapter.run(CancellationToken::new()).await;

        let replies = transport.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1.headers.message_type, MessageTypeEnum::Response);

        let publications = transport.publications();
        assert_eq!(publications.len(), 1);
        assert_eq!(publications[0].0, "instance-creation");
        assert_eq!(publications[0].1.headers.message_type, MessageTypeEnum::InstanceCreation);

        assert_eq!(transport.acked().len(), 1);
    }

    #[tokio::test]
    async fn permission_denied_yields_single_error_reply_and_ack() {
        let dir = tempfile::tempdir().unwrap();
        write_template(
            dir.path(),
            "cs135-f23.json.tera",
            r#"{"template": {"name": "cs135-f23"}, "name": "{{ environment.instance.name }}"}"#,
        );

        let svc = Arc::new(service(dir.path()));
        let transport = Arc::new(InMemoryTransport::new());
        let adapter = BusAdapter::new(svc, Arc::clone(&transport));

        let delivery = create_delivery(&transport, environment("box1", "alice"), "mallory");
        transport.enqueue(delivery);

        adapter.run(CancellationToken::new()).await;

        let replies = transport.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1.headers.message_type, MessageTypeEnum::Error);
        assert_eq!(replies[0].1.body["type"], "PermissionDenied");
        assert!(transport.publications().is_empty());
        assert_eq!(transport.acked().len(), 1);
    }

    #[tokio::test]
    async fn unrecognized_message_type_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let svc = Arc::new(service(dir.path()));
        let transport = Arc::new(InMemoryTransport::new());
        let adapter = BusAdapter::new(svc, Arc::clone(&transport));

        transport.enqueue(RawDelivery {
            headers: serde_json::json!({"x-type": "bogus"}),
            content_type: "application/json".to_string(),
            reply_to: None,
            correlation_id: None,
            user_id: Some("alice".to_string()),
            body: serde_json::json!({}),
            ack: transport.next_ack_token(),
        });

        adapter.run(CancellationToken::new()).await;

        let replies = transport.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1.body["type"], "ValidationError");
    }

    #[tokio::test]
    async fn wrong_content_type_is_rejected_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let svc = Arc::new(service(dir.path()));
        let transport = Arc::new(InMemoryTransport::new());
        let adapter = BusAdapter::new(svc, Arc::clone(&transport));

        transport.enqueue(RawDelivery {
            headers: serde_json::json!({"x-type": "create"}),
            content_type: "text/plain".to_string(),
            reply_to: None,
            correlation_id: None,
            user_id: Some("alice".to_string()),
            body: serde_json::json!({}),
            ack: transport.next_ack_token(),
        });

        adapter.run(CancellationToken::new()).await;

        let replies = transport.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1.body["type"], "ValidationError");
    }

    #[tokio::test]
    async fn fatal_transport_error_triggers_reconnect_then_resumes() {
        let dir = tempfile::tempdir().unwrap();
        write_template(
            dir.path(),
            "cs135-f23.json.tera",
            r#"{"template": {"name": "cs135-f23"}, "name": "{{ environment.instance.name }}"}"#,
        );

        let svc = Arc::new(service(dir.path()));
        let transport = Arc::new(InMemoryTransport::new());
        let adapter = BusAdapter::new(svc, Arc::clone(&transport));

        transport.enqueue_fatal("connection reset");
        transport.enqueue(create_delivery(&transport, environment("box1", "alice"), "alice"));

        let run = tokio::time::timeout(Duration::from_secs(5), adapter.run(CancellationToken::new()));
        run.await.expect("adapter should drain after reconnecting");

        assert_eq!(transport.reconnect_count(), 1);
        assert_eq!(transport.replies().len(), 1);
    }
}
