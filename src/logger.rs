use std::fs::File;

use time::{format_description, OffsetDateTime};
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, FmtSubscriber};

use crate::configuration::Configuration;

/// Installs the global tracing subscriber for this process.
///
/// With `log` enabled the subscriber writes TRACE-level records to a
/// timestamped `*_arena_log.txt` file in the working directory; otherwise it
/// writes INFO-level (or WARN-level when not verbose) records to stdout.
/// Does nothing if a global subscriber is already set, so constructing
/// several arenas is fine; will panic if the log file cannot be created.
pub fn init_logger(config: &Configuration) {
    let (writer, max_level, ansi) = if config.log {
        let file = File::create(log_file_name()).unwrap();
        (BoxMakeWriter::new(file), Level::TRACE, false)
    } else {
        let level = if config.verbose {
            Level::INFO
        } else {
            Level::WARN
        };
        (BoxMakeWriter::new(std::io::stdout), level, true)
    };

    let local_offset =
        time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        local_offset,
        format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]").unwrap(),
    );

    let subscriber = FmtSubscriber::builder()
        .with_max_level(max_level)
        .with_ansi(ansi)
        .with_timer(timer)
        .with_writer(writer)
        .finish();

    // first caller wins; callers already running under their own subscriber
    // keep it
    let _ = set_global_default(subscriber);
}

fn log_file_name() -> String {
    let format =
        format_description::parse("[year]-[month]-[day]_[hour]:[minute]:[second]_arena_log.txt")
            .unwrap();
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&format).unwrap()
}
