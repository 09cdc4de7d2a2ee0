use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("template render error in '{name}': {cause}")]
    Render { name: String, cause: String },
}

pub type TemplateResult<T> = Result<T, TemplateError>;
