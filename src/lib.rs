pub mod api_client;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod http_client;
pub mod models;
pub mod services;
pub mod store;

pub use services::enrollment;
pub use services::visits;
