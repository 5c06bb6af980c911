mod config;
pub use config::{Config, StoreBackend};

mod error;
pub use error::{Error, Result};

pub mod discord;
pub mod http;
pub mod membership;
pub mod store;
pub mod sync;
