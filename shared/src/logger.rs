use std::io::Write;

use chrono::Local;
use colored::Colorize;
use env_logger::Env;
use log::Level;

/// Installs the global logger. `RUST_LOG` overrides the `info` default.
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        let level = match record.level() {
            Level::Error => "ERROR".red().bold(),
            Level::Warn => "WARN ".yellow(),
            Level::Info => "INFO ".green(),
            Level::Debug => "DEBUG".blue(),
            Level::Trace => "TRACE".dimmed(),
        };
        writeln!(
            buf,
            "{} {} {} {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string().dimmed(),
            level,
            record.target().cyan(),
            record.args()
        )
    });
    let _ = builder.try_init();
}
