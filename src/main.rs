use anyhow::Context;
use clap::Parser;
use log::info;
use smartmeter_rs::config::DEFAULT_CONFIG_FILE;
use smartmeter_rs::{
    init_logger, Config, ConsoleSink, Decryptor, InfluxSink, MeasurementRegistry, MeterReader,
    MqttSink, ProcessMetrics, PrometheusExporter, SerialPortOpener, Transport,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "smartmeter")]
#[command(about = "Reads the customer interface of a DLMS/COSEM smart meter")]
struct Cli {
    /// Path of the JSON configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load_from_file(&cli.config)
        .with_context(|| format!("Error loading configuration {}", cli.config.display()))?;
    init_logger(&config.logging)?;

    info!("Verwendete Konfiguration:");
    info!("{}", config);

    let metrics = Arc::new(ProcessMetrics::new());
    let transport = Transport::new(
        SerialPortOpener::new(config.serial_config()),
        Arc::clone(&metrics),
    );
    let mut reader = MeterReader::new(
        transport,
        Decryptor::new(config.meter_key()?),
        MeasurementRegistry::new(),
        metrics,
    );

    if config.logging.console.enabled {
        reader.add_sink(Box::new(ConsoleSink::new()));
    }
    if config.mqtt.enabled {
        reader.add_sink(Box::new(MqttSink::connect(config.mqtt_sink_config())));
    }
    if config.influxdb.enabled {
        reader.add_sink(Box::new(InfluxSink::new(config.influx_sink_config()?)?));
    }
    if config.prometheus.enabled {
        let exporter = PrometheusExporter::start(config.prometheus_sink_config())
            .await
            .context("Failed to start Prometheus server")?;
        reader.add_sink(Box::new(exporter));
    }

    tokio::select! {
        result = reader.run() => result.context("Meter reader stopped")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
