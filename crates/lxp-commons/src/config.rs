use std::collections::HashMap;
use std::env;

use serde::{
    Deserialize,
    Serialize,
};

use crate::error::ProvisionerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub address: String,
}

/// Process configuration, loaded once at startup from environment
/// variables and passed explicitly into `InstanceService::new` and
/// `BusAdapter::new` — no process-wide singleton.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    pub etcd_host: String,
    pub etcd_port: u16,
    pub etcd_user: Option<String>,
    pub etcd_password: Option<String>,

    pub port_range_start: u16,
    pub port_range_end: u16,

    pub nodes: HashMap<String, NodeConfig>,
    pub admin_users: Vec<String>,

    pub template_dir: String,

    pub lock_name: String,
    pub lock_timeout_secs: u64,
}

impl ProvisionerConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Environment Variables
    /// * `ETCD_HOST` - etcd endpoint host (required)
    /// * `ETCD_PORT` - etcd endpoint port (required)
    /// * `ETCD_USER` / `ETCD_PASSWORD` - optional etcd auth
    /// * `LX_PORT_RANGE_START` / `LX_PORT_RANGE_END` - allocator range (default 9000..15000)
    /// * `LX_NODES` - comma-separated `name=address` pairs
    /// * `LX_ADMIN_USERS` - comma-separated usernames exempt from ownership checks
    /// * `LX_TEMPLATE_DIR` - directory `TemplateStore` loads `*.json.tera` from
    /// * `LX_LOCK_NAME` - name of the distributed lock guarding port allocation (default `port-pool`)
    /// * `LX_LOCK_TIMEOUT_SECS` - lock acquisition timeout in seconds (default 10)
    pub fn from_env() -> Result<Self, ProvisionerError> {
        let etcd_host = required_var("ETCD_HOST")?;
        let etcd_port = parse_var("ETCD_PORT", 2379)?;

        let etcd_user = env::var("ETCD_USER").ok();
        let etcd_password = env::var("ETCD_PASSWORD").ok();

        let port_range_start = parse_var("LX_PORT_RANGE_START", 9000)?;
        let port_range_end = parse_var("LX_PORT_RANGE_END", 15000)?;
        if port_range_start >= port_range_end {
            return Err(ProvisionerError::Config(format!(
                "LX_PORT_RANGE_START ({port_range_start}) must be less than LX_PORT_RANGE_END ({port_range_end})"
            )));
        }

        let nodes = parse_nodes(env::var("LX_NODES").unwrap_or_default())?;

        let admin_users = env::var("LX_ADMIN_USERS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let template_dir = env::var("LX_TEMPLATE_DIR").unwrap_or_else(|_| "templates".to_string());

        let lock_name = env::var("LX_LOCK_NAME").unwrap_or_else(|_| "port-pool".to_string());
        let lock_timeout_secs = parse_var("LX_LOCK_TIMEOUT_SECS", 10)?;

        Ok(Self {
            etcd_host,
            etcd_port,
            etcd_user,
            etcd_password,
            port_range_start,
            port_range_end,
            nodes,
            admin_users,
            template_dir,
            lock_name,
            lock_timeout_secs,
        })
    }

    pub fn etcd_endpoint(&self) -> String {
        format!("{}:{}", self.etcd_host, self.etcd_port)
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.admin_users.iter().any(|u| u == username)
    }
}

fn required_var(key: &str) -> Result<String, ProvisionerError> {
    env::var(key).map_err(|_| ProvisionerError::Config(format!("{key} not set")))
}

fn parse_var<T>(key: &str, default: T) -> Result<T, ProvisionerError>
where
    T: std::str::FromStr,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ProvisionerError::Config(format!("invalid {key}: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn parse_nodes(raw: String) -> Result<HashMap<String, NodeConfig>, ProvisionerError> {
    let mut nodes = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, address) = entry.split_once('=').ok_or_else(|| {
            ProvisionerError::Config(format!("invalid LX_NODES entry: {entry}"))
        })?;
        nodes.insert(
            name.to_string(),
            NodeConfig {
                name: name.to_string(),
                address: address.to_string(),
            },
        );
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use std::sync::MutexGuard;

    use super::*;
    use crate::test_utils::ENV_TEST_MUTEX;

    const VARS: &[&str] = &[
        "ETCD_HOST",
        "ETCD_PORT",
        "ETCD_USER",
        "ETCD_PASSWORD",
        "LX_PORT_RANGE_START",
        "LX_PORT_RANGE_END",
        "LX_NODES",
        "LX_ADMIN_USERS",
        "LX_TEMPLATE_DIR",
        "LX_LOCK_NAME",
        "LX_LOCK_TIMEOUT_SECS",
    ];

    fn clear_vars() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    fn lock_env() -> MutexGuard<'static, ()> {
        ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn loads_defaults_when_optional_vars_absent() {
        let _guard = lock_env();
        clear_vars();
        env::set_var("ETCD_HOST", "etcd.internal");
        env::set_var("ETCD_PORT", "2379");

        let config = ProvisionerConfig::from_env().expect("config should load");
        assert_eq!(config.port_range_start, 9000);
        assert_eq!(config.port_range_end, 15000);
        assert_eq!(config.lock_name, "port-pool");
        assert_eq!(config.lock_timeout_secs, 10);
        assert!(config.nodes.is_empty());
        clear_vars();
    }

    #[test]
    fn rejects_inverted_port_range() {
        let _guard = lock_env();
        clear_vars();
        env::set_var("ETCD_HOST", "etcd.internal");
        env::set_var("ETCD_PORT", "2379");
        env::set_var("LX_PORT_RANGE_START", "9000");
        env::set_var("LX_PORT_RANGE_END", "8000");

        let err = ProvisionerConfig::from_env().unwrap_err();
        assert!(matches!(err, ProvisionerError::Config(_)));
        clear_vars();
    }

    #[test]
    fn parses_node_table_and_admin_users() {
        let _guard = lock_env();
        clear_vars();
        env::set_var("ETCD_HOST", "etcd.internal");
        env::set_var("ETCD_PORT", "2379");
        env::set_var("LX_NODES", "node-a=10.0.0.1, node-b=10.0.0.2");
        env::set_var("LX_ADMIN_USERS", "alice, bob");

        let config = ProvisionerConfig::from_env().expect("config should load");
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes["node-a"].address, "10.0.0.1");
        assert!(config.is_admin("alice"));
        assert!(!config.is_admin("carol"));
        clear_vars();
    }
}
