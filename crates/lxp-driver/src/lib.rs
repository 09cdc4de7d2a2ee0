pub mod error;
#[cfg(any(test, feature = "test-util"))]
mod in_memory;
mod traits;

pub use error::{
    DriverError,
    DriverResult,
};
#[cfg(any(test, feature = "test-util"))]
pub use in_memory::InMemoryDriver;
pub use traits::{
    ExecResult,
    HostDriver,
    InstanceState,
};
