use std::path::Path;

use anyhow::Context;
use ibhist::{
    AssetType, BarSize, DataType, GatewayConfig, HistoricalDataClient, HistoricalDataRequest,
    HistoryDuration, Right, Table,
};
use tracing::{info, warn};

use crate::cli::{Cli, Command, GetDataArgs, OutputFormat};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::GetData(args) => get_data(cli, args).await,
        Command::ListEnums => {
            print!("{}", list_enums());
            Ok(())
        }
    }
}

/// Defaults, then the YAML file, then flags and their env fallbacks.
pub fn gateway_config(cli: &Cli) -> Result<GatewayConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))
            .map_err(CliError::Config)?,
        None => GatewayConfig::default(),
    };

    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(client_id) = cli.client_id {
        config.client_id = client_id;
    }
    if let Some(secs) = cli.connect_timeout {
        config.connect_timeout_secs = secs;
    }
    if let Some(secs) = cli.request_timeout {
        config.request_timeout_secs = secs;
    }

    config
        .validate()
        .context("invalid gateway settings")
        .map_err(CliError::Config)?;
    Ok(config)
}

async fn get_data(cli: &Cli, args: &GetDataArgs) -> Result<(), CliError> {
    // invalid input fails before any connection attempt
    let request = HistoricalDataRequest::validate(&args.to_params()).map_err(ibhist::Error::from)?;
    let config = gateway_config(cli)?;

    info!(
        request = %request,
        addr = %config.addr(),
        client_id = config.client_id,
        "fetching historical data"
    );
    let client = HistoricalDataClient::new(config)?;
    let result = client.get_historical_data(&request).await;
    if let Err(e) = client.disconnect().await {
        warn!(error = %e, "disconnect failed");
    }
    let response = result?;
    let table = response.to_table();

    if !args.no_display {
        println!(
            "{}: {} rows ({} to {})",
            request,
            response.meta.row_count,
            response.meta.start.as_deref().unwrap_or("-"),
            response.meta.end.as_deref().unwrap_or("-"),
        );
        print!("{}", table.render_preview(args.rows));
    }

    if let Some(path) = &args.output {
        write_output(&table, path, args.format).map_err(CliError::Output)?;
        info!(path = %path.display(), rows = table.len(), "saved");
    }
    Ok(())
}

fn write_output(table: &Table, path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Csv => table
            .save_csv(path)
            .with_context(|| format!("failed to write {}", path.display())),
        OutputFormat::Json => {
            let json = table.to_json()?;
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))
        }
    }
}

fn list_enums() -> String {
    fn section(out: &mut String, title: &str, items: impl Iterator<Item = String>) {
        out.push_str(title);
        out.push('\n');
        for item in items {
            out.push_str("  ");
            out.push_str(&item);
            out.push('\n');
        }
    }

    let mut out = String::new();
    section(
        &mut out,
        "Asset types:",
        AssetType::ALL
            .iter()
            .map(|a| format!("{:<6}{}", a.as_str(), a.description())),
    );
    section(
        &mut out,
        "Durations:",
        HistoryDuration::ALL
            .iter()
            .map(|d| format!("{:<8}{}", d.as_str(), d.name())),
    );
    section(
        &mut out,
        "Bar sizes:",
        BarSize::ALL
            .iter()
            .map(|b| format!("{:<10}{}", b.as_str(), b.name())),
    );
    section(
        &mut out,
        "Data types:",
        DataType::ALL.iter().map(|d| d.as_str().to_string()),
    );
    section(
        &mut out,
        "Rights:",
        Right::ALL
            .iter()
            .map(|r| format!("{:<3}{}", r.as_str(), r.name())),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use ibhist_gateway::SimGateway;
    use std::io::Write;

    #[test]
    fn test_config_layering() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host: 10.1.2.3\nport: 4002\nrequest_timeout_secs: 90").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::try_parse_from([
            "ibhist", "--config", &path, "--port", "4001", "list-enums",
        ])
        .unwrap();
        let config = gateway_config(&cli).unwrap();
        assert_eq!(config.host, "10.1.2.3");
        assert_eq!(config.port, 4001);
        assert_eq!(config.request_timeout_secs, 90);
        assert_eq!(config.client_id, 1);
    }

    #[test]
    fn test_bad_config_is_a_config_error() {
        let cli = Cli::try_parse_from(["ibhist", "--connect-timeout", "0", "list-enums"]).unwrap();
        let err = gateway_config(&cli).unwrap_err();
        assert_eq!(err.kind(), "config");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_list_enums() {
        let out = list_enums();
        assert!(out.contains("5 mins"));
        assert!(out.contains("BID_ASK"));
        assert!(out.contains("Future"));
    }

    #[tokio::test]
    async fn test_invalid_request_exits_with_validation() {
        let cli = Cli::try_parse_from([
            "ibhist",
            "get-data",
            "AAPL",
            "--asset-type",
            "OPT",
            "--strike",
            "150",
            "--right",
            "C",
            "--port",
            "1",
        ])
        .unwrap();
        let err = run(&cli).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_get_data_writes_csv() {
        let sim = SimGateway::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        let server = sim.clone();
        tokio::spawn(async move { server.serve(listener).await });

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("aapl.csv");
        let cli = Cli::try_parse_from([
            "ibhist",
            "--host",
            "127.0.0.1",
            "--port",
            &port,
            "get-data",
            "AAPL",
            "--no-display",
            "--output",
            output.to_str().unwrap(),
        ])
        .unwrap();
        run(&cli).await.unwrap();

        let csv = std::fs::read_to_string(&output).unwrap();
        assert_eq!(csv.lines().count(), 79);
        assert!(csv.starts_with("date,open,high,low,close,volume,wap,bar_count\n"));
        assert_eq!(sim.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_a_connection_error() {
        // bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        drop(listener);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "connect_retries: 0").unwrap();
        let config = file.path().to_str().unwrap().to_string();

        let cli = Cli::try_parse_from([
            "ibhist", "--config", &config, "--port", &port, "get-data", "AAPL", "--no-display",
        ])
        .unwrap();
        let err = run(&cli).await.unwrap_err();
        assert_eq!(err.kind(), "connection");
        assert_eq!(err.exit_code(), 3);
    }
}
