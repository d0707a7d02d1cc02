pub mod api;
pub mod bus;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod models;
pub mod push;
pub mod runtime;
pub mod session;
pub mod stats;
pub mod store;
pub mod tracing_setup;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::CoreConfig;
pub use error::{CoreError, ErrorClass, Result};
pub use events::{CoreEvent, Notice};
pub use models::Identity;
pub use runtime::CoreRuntime;
pub use session::SessionGate;
