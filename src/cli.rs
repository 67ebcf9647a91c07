//! CLI argument parsing for the vigia agent

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "vigia")]
#[command(version)]
#[command(about = "Live call-graph sampling agent for JVM processes", long_about = None)]
pub struct Cli {
    /// TCP port the exposition server listens on
    #[arg(short = 'p', long = "port", value_name = "PORT", default_value = "8080")]
    pub port: u16,

    /// Delay between sampling iterations in milliseconds
    #[arg(long = "interval-ms", value_name = "MILLIS", default_value = "10")]
    pub interval_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["vigia"]);
        assert_eq!(cli.port, 8080);
        assert_eq!(cli.interval_ms, 10);
    }

    #[test]
    fn test_cli_port_flag() {
        let cli = Cli::parse_from(["vigia", "-p", "9000"]);
        assert_eq!(cli.port, 9000);
    }

    #[test]
    fn test_cli_interval_flag() {
        let cli = Cli::parse_from(["vigia", "--interval-ms", "50"]);
        assert_eq!(cli.interval_ms, 50);
    }

    #[test]
    fn test_cli_rejects_non_numeric_port() {
        assert!(Cli::try_parse_from(["vigia", "--port", "web"]).is_err());
    }
}
