pub mod config;
pub mod crypto;
pub mod errors;
pub mod rotation;
pub mod session;
pub mod store;
pub mod vault;
