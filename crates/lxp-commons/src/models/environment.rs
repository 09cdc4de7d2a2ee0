use serde::{
    Deserialize,
    Serialize,
};

use crate::models::instance::Instance;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub uid_number: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Course {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_number: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semester: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub name: String,

    #[serde(rename = "type")]
    pub environment_type: String,

    pub instance: Instance,
    pub user: User,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<Course>,
}

impl Environment {
    /// The template name implied by the course triple, used when
    /// `instance.template` isn't set explicitly.
    pub fn course_template_name(&self) -> Option<String> {
        let course = self.course.as_ref()?;
        let subject = course.subject.as_deref()?;
        let catalog_number = course.catalog_number.as_deref()?;
        let semester = course.semester.as_deref()?;
        Some(format!("{subject}{catalog_number}-{semester}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessage {
    pub environment: Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationsEnum {
    Start,
    Stop,
    Restart,
    Status,
    Command,
}

impl OperationsEnum {
    /// Operations the operate pipeline is willing to execute. Everything
    /// else in the enum exists for wire-format parity with the original
    /// but is rejected by `InstanceService::operate` as `InvalidOperation`.
    pub const ALLOWED: [OperationsEnum; 2] = [OperationsEnum::Restart, OperationsEnum::Status];

    pub fn is_allowed(&self) -> bool {
        Self::ALLOWED.contains(self)
    }
}

impl std::fmt::Display for OperationsEnum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationsEnum::Start => "start",
            OperationsEnum::Stop => "stop",
            OperationsEnum::Restart => "restart",
            OperationsEnum::Status => "status",
            OperationsEnum::Command => "command",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMessage {
    pub username: String,
    pub instance: String,
    pub operation: OperationsEnum,
}

/// The status record returned by the operate pipeline's `status` op and
/// the reply to a successful `restart`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatusMessage {
    pub id: String,

    #[serde(rename = "type")]
    pub message_type: String,

    pub name: String,
    pub status: String,
    pub environment: EnvironmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentStatus {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_template_name_composes_subject_catalog_semester() {
        let env = Environment {
            id: "e1".into(),
            name: "env".into(),
            environment_type: "simple".into(),
            instance: Instance {
                name: "i1".into(),
                ..Default::default()
            },
            user: User {
                id: "u1".into(),
                uid_number: "1000".into(),
                username: "alice".into(),
            },
            course: Some(Course {
                subject: Some("cs".into()),
                catalog_number: Some("135".into()),
                semester: Some("f23".into()),
            }),
        };

        assert_eq!(env.course_template_name().as_deref(), Some("cs135-f23"));
    }

    #[test]
    fn operation_whitelist_excludes_start_stop_command() {
        assert!(OperationsEnum::Restart.is_allowed());
        assert!(OperationsEnum::Status.is_allowed());
        assert!(!OperationsEnum::Start.is_allowed());
        assert!(!OperationsEnum::Stop.is_allowed());
        assert!(!OperationsEnum::Command.is_allowed());
    }
}
