pub mod analyzer;
pub mod server;
