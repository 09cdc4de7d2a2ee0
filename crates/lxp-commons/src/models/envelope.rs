use serde::{
    Deserialize,
    Serialize,
};

/// The `x-type` discriminant carried on every bus message, both inbound
/// commands and outbound replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageTypeEnum {
    Create,
    Operation,
    InstanceCreation,
    EnvironmentCreation,
    Response,
    Error,
}

impl MessageTypeEnum {
    /// Parses the `x-type` header value case-insensitively, matching the
    /// original's `.lower()` normalization on ingest.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "create" => Some(Self::Create),
            "operation" => Some(Self::Operation),
            "instance-creation" => Some(Self::InstanceCreation),
            "environment-creation" => Some(Self::EnvironmentCreation),
            "response" => Some(Self::Response),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageTypeEnum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Operation => "operation",
            Self::InstanceCreation => "instance-creation",
            Self::EnvironmentCreation => "environment-creation",
            Self::Response => "response",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// The `x-*` headers carried alongside a message body on the bus.
///
/// Field names track the wire header names (`x-user`, `x-source`,
/// `x-application`) rather than the Rust-idiomatic short names, since
/// this struct exists to be serialized onto and parsed off of the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeaders {
    #[serde(rename = "x-type")]
    pub message_type: MessageTypeEnum,

    #[serde(rename = "x-user", default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(rename = "x-source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(
        rename = "x-application",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub application: Option<String>,
}

/// A message as it travels the bus: headers plus an opaque JSON body, the
/// body shape determined by `headers.message_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub headers: MessageHeaders,

    pub content_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    pub body: serde_json::Value,
}

impl Envelope {
    pub fn new(message_type: MessageTypeEnum, body: serde_json::Value) -> Self {
        Self {
            headers: MessageHeaders {
                message_type,
                user: None,
                source: None,
                application: None,
            },
            content_type: "application/json".to_string(),
            reply_to: None,
            correlation_id: None,
            user_id: None,
            body,
        }
    }

    /// Builds a reply envelope, carrying the original's `correlation_id`
    /// forward so the requester can match it up.
    pub fn reply(&self, message_type: MessageTypeEnum, body: serde_json::Value) -> Self {
        Self {
            headers: MessageHeaders {
                message_type,
                user: self.headers.user.clone(),
                source: self.headers.source.clone(),
                application: self.headers.application.clone(),
            },
            content_type: "application/json".to_string(),
            reply_to: None,
            correlation_id: self.correlation_id.clone(),
            user_id: self.user_id.clone(),
            body,
        }
    }
}
