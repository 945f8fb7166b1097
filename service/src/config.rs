use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::time::Duration;

pub const DEFAULT_INTERFACE: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3333;

#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Line-oriented multi-user chat relay", long_about = None)]
pub struct Config {
    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = DEFAULT_INTERFACE)]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Seconds to wait for open connections to flush queued messages during shutdown
    #[arg(long, env, default_value_t = 5)]
    pub shutdown_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or(DEFAULT_INTERFACE)
    }

    /// The `host:port` string the relay binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.interface(), self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["flexare_chat"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_listen_addr_from_explicit_arguments() {
        let config = parse(&["--interface", "127.0.0.1", "--port", "4555"]);
        assert_eq!(config.listen_addr(), "127.0.0.1:4555");
    }

    #[test]
    fn test_log_level_parses_uppercase_names() {
        let config = parse(&["--log-level-filter", "DEBUG"]);
        assert_eq!(config.log_level_filter, LevelFilter::Debug);
    }

    #[test]
    fn test_log_level_rejects_unknown_names() {
        let result = Config::try_parse_from(["flexare_chat", "--log-level-filter", "LOUD"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_shutdown_grace_is_seconds() {
        let config = parse(&["--shutdown-grace-secs", "2"]);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(2));
    }

    #[test]
    fn test_interface_falls_back_to_default_when_unset() {
        let mut config = parse(&["--interface", "10.0.0.1"]);
        config.interface = None;
        assert_eq!(config.interface(), DEFAULT_INTERFACE);
    }
}
