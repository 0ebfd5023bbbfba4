//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ibhist::RequestParams;

/// ibhist: download historical bars from TWS / IB Gateway
#[derive(Debug, Parser)]
#[command(name = "ibhist", version, about = "Download historical bars from TWS / IB Gateway")]
pub struct Cli {
    /// Gateway host
    #[arg(long, global = true, env = "TWS_HOST")]
    pub host: Option<String>,

    /// Gateway API port (7497 paper TWS, 7496 live TWS, 4002/4001 IB Gateway)
    #[arg(long, global = true, env = "TWS_PORT")]
    pub port: Option<u16>,

    /// API client id; must be unique per gateway
    #[arg(long, global = true, env = "TWS_CLIENT_ID")]
    pub client_id: Option<i32>,

    /// YAML file with gateway settings; flags override it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Handshake timeout in seconds
    #[arg(long, global = true, env = "TWS_CONNECT_TIMEOUT")]
    pub connect_timeout: Option<u64>,

    /// Per-request timeout in seconds
    #[arg(long, global = true, env = "TWS_REQUEST_TIMEOUT")]
    pub request_timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch historical bars for one contract.
    ///
    ///   ibhist get-data AAPL
    ///   ibhist get-data MSFT --duration "1 M" --bar-size "1 day" --output msft.csv
    ///   ibhist get-data ES --asset-type FUT --exchange CME --expiry 202412
    GetData(GetDataArgs),

    /// List accepted asset types, durations, bar sizes, data types and rights.
    ListEnums,
}

#[derive(Debug, Args)]
pub struct GetDataArgs {
    /// Contract symbol
    pub symbol: String,

    #[arg(long, default_value = "1 D")]
    pub duration: String,

    #[arg(long, default_value = "5 mins")]
    pub bar_size: String,

    #[arg(long, default_value = "TRADES")]
    pub data_type: String,

    #[arg(long, default_value = "STK")]
    pub asset_type: String,

    #[arg(long, default_value = "SMART")]
    pub exchange: String,

    #[arg(long, default_value = "USD")]
    pub currency: String,

    /// Expiry for futures (YYYYMM or YYYYMMDD) and options (YYYYMMDD)
    #[arg(long)]
    pub expiry: Option<String>,

    /// Option strike
    #[arg(long)]
    pub strike: Option<String>,

    /// Option right (C/P)
    #[arg(long)]
    pub right: Option<String>,

    /// End of the requested span, `YYYYMMDD HH:MM:SS [TZ]`; defaults to now
    #[arg(long)]
    pub end: Option<String>,

    /// Include bars outside regular trading hours
    #[arg(long, default_value_t = false)]
    pub all_hours: bool,

    /// Write the rows to this file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Format of the --output file
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    pub format: OutputFormat,

    /// Don't print the preview table
    #[arg(long, default_value_t = false)]
    pub no_display: bool,

    /// Rows shown in the preview
    #[arg(long, default_value_t = 10)]
    pub rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
}

impl GetDataArgs {
    pub fn to_params(&self) -> RequestParams {
        RequestParams {
            asset_type: Some(self.asset_type.clone()),
            duration: Some(self.duration.clone()),
            bar_size: Some(self.bar_size.clone()),
            data_type: Some(self.data_type.clone()),
            exchange: Some(self.exchange.clone()),
            currency: Some(self.currency.clone()),
            use_rth: Some(!self.all_hours),
            end_date_time: self.end.clone(),
            expiry: self.expiry.clone(),
            strike: self.strike.clone(),
            right: self.right.clone(),
            ..RequestParams::new(self.symbol.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_data_defaults() {
        let cli = Cli::try_parse_from(["ibhist", "get-data", "aapl"]).unwrap();
        let Command::GetData(args) = cli.command else {
            panic!("expected get-data");
        };
        let params = args.to_params();
        assert_eq!(params.symbol, "aapl");
        assert_eq!(params.duration.as_deref(), Some("1 D"));
        assert_eq!(params.bar_size.as_deref(), Some("5 mins"));
        assert_eq!(params.use_rth, Some(true));
        assert_eq!(params.expiry, None);
        assert_eq!(args.rows, 10);
        assert_eq!(args.format, OutputFormat::Csv);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ibhist",
            "get-data",
            "SPY",
            "--all-hours",
            "--port",
            "4002",
            "--client-id",
            "9",
            "--output",
            "spy.csv",
        ])
        .unwrap();
        assert_eq!(cli.port, Some(4002));
        assert_eq!(cli.client_id, Some(9));
        let Command::GetData(args) = cli.command else {
            panic!("expected get-data");
        };
        assert_eq!(args.to_params().use_rth, Some(false));
        assert_eq!(args.output, Some(PathBuf::from("spy.csv")));
    }

    #[test]
    fn test_missing_symbol_is_a_usage_error() {
        let err = Cli::try_parse_from(["ibhist", "get-data"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
