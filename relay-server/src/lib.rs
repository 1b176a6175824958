pub mod config;
pub mod error;
pub mod filter;
pub mod ollama;
pub mod page;
pub mod routes;
pub mod sse;

pub use config::Config;
pub use error::GatewayError;
pub use routes::{build_router, AppState};
