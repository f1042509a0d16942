// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod http_poll;
pub mod ws_source;
