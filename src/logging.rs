//! Structured logging setup: `colored` + `env_logger`, with the crate's
//! label taken from a caller-supplied string rather than baked in at compile
//! time, since this crate has no `CARGO_PKG_NAME` of its own that end users
//! would recognize.

use colored::Colorize;
use env_logger::Builder;
use log::{Level, LevelFilter};
use std::io::Write;

/// Installs a colored `env_logger` with `target_label` tagging every line
/// from this crate, and `level` controlling this crate's own verbosity.
/// Dependencies outside `target_label`'s module path are always capped at
/// `Warn`, keeping our own lines verbose and everything else quiet.
pub fn setup_logging(target_label: &'static str, level: LevelFilter) {
    Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(module_path!().split("::").next().unwrap_or("fixity_core"), level)
        .format(move |buf, record| {
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = match record.level() {
                        Level::Warn => "WARN".yellow(),
                        Level::Error => "ERROR".red(),
                        _ => unreachable!(),
                    };
                    let path = record.target().to_string().white();
                    format!("[{} {} {}] {}", target_label.cyan(), level_str, path, record.args())
                }
                _ => format!("[{}] {}", target_label.cyan(), record.args()),
            };
            writeln!(buf, "{line}")
        })
        .init();
}
