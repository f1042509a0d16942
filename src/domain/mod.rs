// Domain layer - pure models and algorithms, no I/O
pub mod chart;
pub mod gauge;
pub mod payload;
pub mod scale;
pub mod series;
pub mod telemetry;
pub mod widget;
