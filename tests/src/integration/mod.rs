//! Cross-layer flows. Each module holds `#[cfg(test)]` tests only.

pub mod config_flows;
pub mod publish_flows;
pub mod telemetry_flows;
