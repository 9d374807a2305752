//! Console sink: the customer-interface table in the log.

use super::Sink;
use crate::constants::NET_POWER_NAME;
use crate::registry::{Measurement, MeasurementRegistry};
use chrono::{DateTime, Local, TimeZone};
use log::info;

/// Logs the measurement table at `info` level after every decoded frame.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Sink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn publish(&mut self, registry: &MeasurementRegistry) -> bool {
        for line in format_table(registry, &Local::now()) {
            info!("{}", line);
        }
        true
    }
}

/// Voltages and currents are shown with two decimals.
fn display_value(entry: &Measurement) -> f64 {
    match entry.unit() {
        "V" | "A" => (entry.display() * 100.0).round() / 100.0,
        _ => entry.display(),
    }
}

/// Table lines in log order: header, timestamp, one line per entry, net power.
pub fn format_table<Tz: TimeZone>(registry: &MeasurementRegistry, now: &DateTime<Tz>) -> Vec<String>
where
    Tz::Offset: std::fmt::Display,
{
    let mut lines = Vec::with_capacity(registry.len() + 3);
    lines.push("\n\t\t*** KUNDENSCHNITTSTELLE ***\n\nOBIS Code\tBezeichnung\t\t\t Wert".to_string());
    lines.push(now.format("%d.%m.%Y %H:%M:%S").to_string());
    for entry in registry {
        lines.push(format!(
            "{:<14}\t{:<30} [{}]:\t {}",
            entry.meter_key(),
            entry.long_name(),
            entry.unit(),
            display_value(entry)
        ));
    }
    lines.push(format!(
        "-------------\t{} [W]:\t\t {}",
        NET_POWER_NAME,
        registry.net_active_power()
    ));
    lines
}
