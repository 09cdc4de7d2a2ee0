pub mod config;
pub mod error;
pub mod logging;
pub mod models;

pub use error::{
    ProvisionerError,
    ProvisionerResult,
};
pub use models::*;
