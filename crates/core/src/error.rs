use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Template not found: {}", path.display())]
    TemplateNotFound { path: PathBuf },

    #[error("Template {} is malformed: {reason}", path.display())]
    TemplateMalformed { path: PathBuf, reason: String },

    #[error("Role resolution failed: {0}")]
    RoleResolutionFailed(String),

    #[error("Node '{node_id}' has no input field '{field}'")]
    MutationTargetMissing { node_id: String, field: &'static str },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
