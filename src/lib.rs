#[cfg(feature = "audit-log")]
pub mod audit;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod logging;
pub mod sync;
pub mod transfer;
pub mod unlock;
pub mod vault;
