//! Pipeline services: connection handling, endpoint health, blockhash
//! caching, fee estimation, retries and confirmation tracking.

pub mod blockhash;
pub mod circuit_breaker;
pub mod confirmation;
pub mod connection;
pub mod fee;
pub mod health;
pub mod pool;
pub mod retry;

pub use blockhash::BlockhashManager;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use confirmation::Confirmer;
pub use connection::{RpcConnection, SolanaConnection};
pub use fee::PriorityFeeEstimator;
pub use health::{EndpointHealth, EndpointMetrics};
pub use pool::ConnectionPool;
pub use retry::with_retry;
