//! Logging setup
//!
//! Installs `env_logger` as the `log` backend. `RUST_LOG` overrides the
//! level picked from the verbose flag. Warnings and errors carry a level
//! prefix, everything else is printed bare.

use std::io::Write;

use log::SetLoggerError;

fn builder(verbose: bool) -> env_logger::Builder {
    let level = if verbose { "debug" } else { "info" };

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    builder.format(|buf, record| match record.level() {
        log::Level::Warn | log::Level::Error => {
            writeln!(buf, "[{}] {}", record.level(), record.args())
        }
        _ => writeln!(buf, "{}", record.args()),
    });
    builder
}

/// Initializes the global logger.
///
/// Does nothing if a logger is already installed.
pub fn init_logging(verbose: bool) {
    let _ = try_init_logging(verbose);
}

/// Initializes the global logger, failing if one is already installed.
pub fn try_init_logging(verbose: bool) -> Result<(), SetLoggerError> {
    builder(verbose).try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(true);
        init_logging(false);
        log::info!("logger installed");
        assert!(try_init_logging(false).is_err());
    }
}
