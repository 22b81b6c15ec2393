pub mod app_context;
pub mod diagnostics;
pub mod telemetry;
