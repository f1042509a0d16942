// Live telemetry core - payload normalization, series windows, axes and gauges
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
