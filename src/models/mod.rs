//! Data model shared across the pipeline: error taxonomy, classification,
//! endpoint descriptors and value types.

mod classification;
mod error;
mod rpc_config;
mod types;

pub use classification::*;
pub use error::*;
pub use rpc_config::*;
pub use types::*;
