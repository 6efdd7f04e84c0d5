pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::DataverseConfig;
pub use error::{CoreError, Result};
pub use events::ChatEvent;
pub use types::*;
