use async_trait::async_trait;
use lxp_commons::{
    Device,
    Instance,
};

use crate::error::DriverResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceState {
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// The container host the Instance Service drives. Blocking from the
/// caller's perspective — each request runs on its own worker task, the
/// way `ProxyHandler::start` is expected to run to completion on the task
/// that calls it.
#[async_trait]
pub trait HostDriver: Send + Sync {
    async fn create(&self, spec: serde_json::Value) -> DriverResult<Instance>;

    async fn start(&self, name: &str) -> DriverResult<()>;

    async fn restart(&self, name: &str) -> DriverResult<()>;

    async fn status(&self, name: &str) -> DriverResult<InstanceState>;

    async fn get(&self, name: &str) -> DriverResult<Instance>;

    async fn list(&self) -> DriverResult<Vec<Instance>>;

    async fn update_device(&self, name: &str, device_name: &str, device: Device) -> DriverResult<()>;

    async fn save(&self, instance: &Instance) -> DriverResult<()>;

    async fn execute(&self, name: &str, argv: &[String]) -> DriverResult<ExecResult>;
}
