//! Command-line argument parsing

use clap::Parser;
use std::net::IpAddr;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "lineagent-server",
    about = "LINE webhook bridge for a hosted agent runtime",
    version,
    long_about = "Receives LINE Messaging API webhooks, forwards messages to a streaming \
                  agent runtime and relays the replies back to the chat."
)]
pub struct Args {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// HTTP server port
    #[arg(short, long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Enable JSON log format (useful for production)
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["lineagent-server"]).unwrap();
        assert_eq!(args.port, 8080);
        assert_eq!(args.host.to_string(), "0.0.0.0");
        assert!(!args.json_logs);
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        assert!(Args::try_parse_from(["lineagent-server", "--log-level", "verbose"]).is_err());
    }
}
