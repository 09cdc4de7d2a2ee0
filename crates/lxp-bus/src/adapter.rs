use std::sync::Arc;
use std::time::{
    Duration,
    Instant,
};

use lxp_commons::{
    CreateMessage,
    Envelope,
    MessageHeaders,
    MessageTypeEnum,
    OperationMessage,
    ProvisionerError,
    ProvisionerResult,
};
use lxp_driver::HostDriver;
use lxp_kv::KvStore;
use lxp_service::InstanceService;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{
    error,
    info,
    warn,
};

use crate::traits::{
    RawDelivery,
    Transport,
};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const STABLE_UPTIME: Duration = Duration::from_secs(60);

const INSTANCE_CREATION_ROUTING_KEY: &str = "instance-creation";

struct ParsedHeaders {
    message_type: MessageTypeEnum,
    user: Option<String>,
    source: Option<String>,
    application: Option<String>,
}

fn ci_get<'a>(obj: &'a serde_json::Map<String, serde_json::Value>, key: &str) -> Option<&'a serde_json::Value> {
    obj.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v)
}

/// Parses the wire headers map, matching key and `x-type` value
/// case-insensitively per spec.md §6. A missing or unrecognized `x-type`
/// is a `ValidationError`, not a panic or a silent default — step 1 of
/// spec.md §4.6's dispatch.
fn parse_headers(raw: &serde_json::Value) -> ProvisionerResult<ParsedHeaders> {
    let obj = raw
        .as_object()
        .ok_or_else(|| ProvisionerError::ValidationError("headers must be a JSON object".to_string()))?;

    let type_str = ci_get(obj, "x-type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProvisionerError::ValidationError("missing x-type header".to_string()))?;
    let message_type = MessageTypeEnum::parse(type_str)
        .ok_or_else(|| ProvisionerError::ValidationError(format!("unrecognized x-type header: {type_str}")))?;

    let str_field = |key: &str| ci_get(obj, key).and_then(|v| v.as_str()).map(str::to_string);

    Ok(ParsedHeaders {
        message_type,
        user: str_field("x-user"),
        source: str_field("x-source"),
        application: str_field("x-application"),
    })
}

/// Exponential backoff for the reconnect loop: doubles from 1s up to a
/// 30s cap, and resets back to 1s once the connection has held for more
/// than 60s — spec.md §4.6's "initial 1 s, cap 30 s, reset on stable
/// uptime > 60 s", grounded on
/// `kftray-portforward::kube::proxy_recovery::ProxyRecoveryManager`'s own
/// doubling-capped backoff shape.
struct ReconnectBackoff {
    current: Duration,
    connected_since: Instant,
}

impl ReconnectBackoff {
    fn new() -> Self {
        Self {
            current: INITIAL_BACKOFF,
            connected_since: Instant::now(),
        }
    }

    fn next_delay(&mut self) -> Duration {
        if self.connected_since.elapsed() > STABLE_UPTIME {
            self.current = INITIAL_BACKOFF;
        }
        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, MAX_BACKOFF);
        delay
    }

    fn mark_reconnected(&mut self) {
        self.connected_since = Instant::now();
    }
}

/// Receives envelopes off a `Transport`, dispatches them to the Instance
/// Service's create/operate pipelines, and replies/publishes/acks per
/// spec.md §4.6. Generic over the same `K`/`D`/`T` substitution the rest
/// of the workspace uses — `InMemoryStore`/`InMemoryDriver`/
/// `InMemoryTransport` in tests, real backends in production.
pub struct BusAdapter<K: KvStore, D: HostDriver, T: Transport> {
    service: Arc<InstanceService<K, D>>,
    transport: Arc<T>,
}

impl<K, D, T> BusAdapter<K, D, T>
where
    K: KvStore + 'static,
    D: HostDriver + 'static,
    T: Transport + 'static,
{
    pub fn new(service: Arc<InstanceService<K, D>>, transport: Arc<T>) -> Self {
        Self { service, transport }
    }

    /// Runs the worker loop until `cancel` fires. A worker that loses its
    /// bus session mid-pipeline still runs the create pipeline's
    /// compensations (handled inside `InstanceService::create` itself)
    /// before this loop observes the error and reconnects — it never acks
    /// the delivery that triggered the fatal error.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut backoff = ReconnectBackoff::new();

        loop {
            if cancel.is_cancelled() {
                return;
            }

            match self.transport.recv().await {
                Ok(Some(delivery)) => self.handle_delivery(delivery).await,
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "transport reported a fatal error, reconnecting");
                    if !self.reconnect_with_backoff(&mut backoff, &cancel).await {
                        return;
                    }
                }
            }
        }
    }

    /// Spawns `count` independent workers pulling from the same shared
    /// transport/service, satisfying spec.md §5's "parallel workers, no
    /// shared per-request mutable state" — grounded on
    /// `kftray-server::proxy::server::ProxyServer` (one task per protocol
    /// handler over `Arc`-shared config), generalized from one task per
    /// protocol to N tasks pulling from one transport.
    pub fn spawn_workers(adapter: Arc<Self>, count: usize, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|worker_id| {
                let adapter = Arc::clone(&adapter);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    info!(worker_id, "bus worker started");
                    adapter.run(cancel).await;
                    info!(worker_id, "bus worker stopped");
                })
            })
            .collect()
    }

    /// Returns `false` if cancelled mid-backoff (caller should stop), `true`
    /// once a reconnect attempt has succeeded.
    async fn reconnect_with_backoff(&self, backoff: &mut ReconnectBackoff, cancel: &CancellationToken) -> bool {
        loop {
            let delay = backoff.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return false,
            }

            match self.transport.reconnect().await {
                Ok(()) => {
                    backoff.mark_reconnected();
                    return true;
                }
                Err(e) => {
                    warn!(error = %e, "reconnect attempt failed, retrying");
                }
            }
        }
    }

    async fn handle_delivery(&self, delivery: RawDelivery) {
        if let Err(e) = self.dispatch(&delivery).await {
            let body = serde_json::json!({"type": e.kind(), "message": e.to_string()});
            self.send_error(&delivery, body).await;
        }

        if let Err(e) = self.transport.ack(delivery.ack).await {
            error!(error = %e, "failed to ack delivery");
        }
    }

    /// Steps 1-3 of spec.md §4.6: parse headers, check content type,
    /// dispatch by `x-type`. The reply/publish side effects happen inline
    /// per message type since the response shape differs (an enriched
    /// `Environment` for create, a status record for operate); errors
    /// anywhere in this chain propagate to `handle_delivery`'s single
    /// error-reply path.
    async fn dispatch(&self, delivery: &RawDelivery) -> ProvisionerResult<()> {
        let headers = parse_headers(&delivery.headers)?;

        if !delivery.content_type.eq_ignore_ascii_case("application/json") {
            return Err(ProvisionerError::ValidationError(format!(
                "unsupported content_type: {}",
                delivery.content_type
            )));
        }

        let user = delivery.user_id.clone().unwrap_or_default();

        match headers.message_type {
            MessageTypeEnum::Create => self.handle_create(delivery, &headers, &user).await,
            MessageTypeEnum::Operation => self.handle_operation(delivery, &headers, &user).await,
            other => Err(ProvisionerError::ValidationError(format!(
                "unsupported inbound message type: {other}"
            ))),
        }
    }

    async fn handle_create(&self, delivery: &RawDelivery, headers: &ParsedHeaders, user: &str) -> ProvisionerResult<()> {
        let message: CreateMessage = serde_json::from_value(delivery.body.clone())
            .map_err(|e| ProvisionerError::ValidationError(e.to_string()))?;

        let environment = self.service.create(message, user).await?;
        let body = serde_json::json!({ "environment": &environment });

        self.send_response(delivery, headers, body.clone()).await;
        self.publish_instance_creation(headers, body).await;
        Ok(())
    }

    async fn handle_operation(&self, delivery: &RawDelivery, headers: &ParsedHeaders, user: &str) -> ProvisionerResult<()> {
        let message: OperationMessage = serde_json::from_value(delivery.body.clone())
            .map_err(|e| ProvisionerError::ValidationError(e.to_string()))?;

        let status = self.service.operate(message, user).await?;
        let body = serde_json::to_value(&status).expect("InstanceStatusMessage always serializes");

        self.send_response(delivery, headers, body).await;
        Ok(())
    }

    fn reply_headers(&self, headers: &ParsedHeaders, message_type: MessageTypeEnum) -> MessageHeaders {
        MessageHeaders {
            message_type,
            user: headers.user.clone(),
            source: headers.source.clone(),
            application: headers.application.clone(),
        }
    }

    async fn send_response(&self, delivery: &RawDelivery, headers: &ParsedHeaders, body: serde_json::Value) {
        let envelope = Envelope {
            headers: self.reply_headers(headers, MessageTypeEnum::Response),
            content_type: "application/json".to_string(),
            reply_to: None,
            correlation_id: delivery.correlation_id.clone(),
            user_id: delivery.user_id.clone(),
            body,
        };

        if let Err(e) = self.transport.reply(delivery, envelope).await {
            error!(error = %e, "failed to send response reply");
        }
    }

    async fn send_error(&self, delivery: &RawDelivery, body: serde_json::Value) {
        let envelope = Envelope {
            headers: MessageHeaders {
                message_type: MessageTypeEnum::Error,
                user: None,
                source: None,
                application: None,
            },
            content_type: "application/json".to_string(),
            reply_to: None,
            correlation_id: delivery.correlation_id.clone(),
            user_id: delivery.user_id.clone(),
            body,
        };

        if let Err(e) = self.transport.reply(delivery, envelope).await {
            error!(error = %e, "failed to send error reply");
        }
    }

    async fn publish_instance_creation(&self, headers: &ParsedHeaders, body: serde_json::Value) {
        let envelope = Envelope {
            headers: self.reply_headers(headers, MessageTypeEnum::InstanceCreation),
            content_type: "application/json".to_string(),
            reply_to: None,
            correlation_id: None,
            user_id: None,
            body,
        };

        if let Err(e) = self.transport.publish(INSTANCE_CREATION_ROUTING_KEY, envelope).await {
            error!(error = %e, "failed to publish instance-creation event");
        }
    }
}
