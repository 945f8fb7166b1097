use crate::config::Config;
use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// Runtime crates that log every socket poll. Only useful when chasing I/O problems.
const RUNTIME_MODULES: &[&str] = &["tokio", "mio"];

pub struct Logger {}

impl Logger {
    /// Initializes the global terminal logger from the relay configuration.
    pub fn init_logger(config: &Config) {
        let level = config.log_level_filter;

        if let Err(e) = TermLogger::init(
            level,
            Self::build_log_config(level),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ) {
            eprintln!("Failed to start simplelog: {e}");
        }
    }

    /// Module prefixes dropped at `level`. Everything is shown at Trace.
    fn ignored_modules(level: LevelFilter) -> &'static [&'static str] {
        if level == LevelFilter::Trace {
            &[]
        } else {
            RUNTIME_MODULES
        }
    }

    fn build_log_config(level: LevelFilter) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder
            .set_time_format_rfc3339()
            .set_target_level(LevelFilter::Error)
            .set_thread_level(LevelFilter::Off);

        for &module in Self::ignored_modules(level) {
            builder.add_filter_ignore_str(module);
        }

        builder.build()
    }
}
