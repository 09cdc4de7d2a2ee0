use lxp_allocator::AllocatorError;
use lxp_commons::ProvisionerError;
use lxp_driver::DriverError;
use lxp_templates::TemplateError;

/// Maps a leaf crate's narrow error into the wire-facing
/// `ProvisionerError`. Defined as plain functions rather than `impl From`
/// because neither `ProvisionerError` nor `std::convert::From` is local
/// to this crate — the orphan rule blocks the trait impl, so the service
/// layer does the translation explicitly at each call site instead.
pub(crate) fn allocator_err(e: AllocatorError) -> ProvisionerError {
    match e {
        AllocatorError::Kv(lxp_kv::KvError::LockTimeout(name)) => ProvisionerError::LockTimeout(name),
        other => ProvisionerError::KVUnavailable(other.to_string()),
    }
}

pub(crate) fn template_err(e: TemplateError) -> ProvisionerError {
    match e {
        TemplateError::NotFound(name) => ProvisionerError::TemplateNotFound(name),
        TemplateError::Render { name, cause } => {
            ProvisionerError::TemplateRenderError(format!("{name}: {cause}"))
        }
    }
}

pub(crate) fn driver_err(e: DriverError) -> ProvisionerError {
    match e {
        DriverError::NotFound(name) => ProvisionerError::NotFound(name),
        other => ProvisionerError::DriverError(other.to_string()),
    }
}
