// Application layer - Subscriptions and live widget orchestration
pub mod subscription;
pub mod telemetry_source;
pub mod widget_service;
