use log::LevelFilter;

/// Parses the command line and records when the program started.
pub fn parse_args<T: clap::Parser>() -> (T, std::time::SystemTime) {
    let args = T::parse();
    let launch_time = std::time::SystemTime::now();
    (args, launch_time)
}

/// A filter for the logger: a module name and its level filter.
pub type LogFilter<'a> = (&'a str, LevelFilter);

/// Installs the global logger.
///
/// # Arguments
///
/// * `timestamp` - Base time of the elapsed time printed before every
///   message, if any.
/// * `log_level` - Top level log level of the program. See
///   [`log_filter_from_level`].
/// * `filters` - Per-module filters.
pub fn setup_logging(timestamp: Option<std::time::SystemTime>, log_level: u8, filters: &[LogFilter]) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    builder.format(move |buf, record| {
        let top_level_module = record
            .module_path()
            .and_then(|path| path.split("::").next())
            .unwrap_or("?");
        match timestamp.and_then(|t| t.elapsed().ok()) {
            Some(elapsed) => {
                let secs = elapsed.as_secs();
                writeln!(
                    buf,
                    "{:02}:{:02}:{:02}.{:03} {:5} [{}]: {}",
                    secs / 3600,
                    secs / 60 % 60,
                    secs % 60,
                    elapsed.subsec_millis(),
                    record.level(),
                    top_level_module,
                    record.args()
                )
            }
            None => writeln!(
                buf,
                "{:5} [{}]: {}",
                record.level(),
                top_level_module,
                record.args()
            ),
        }
    });
    builder.filter_level(log_filter_from_level(log_level));
    filters.iter().for_each(|(module, level)| {
        builder.filter_module(module, *level);
    });
    builder.init();
}

/// Filters muting the chatty graphics crates unless asked for.
pub fn wgpu_filters(debug_wgpu: bool) -> [LogFilter<'static>; 3] {
    let level = if debug_wgpu {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    [("wgpu", level), ("wgpu_core", level), ("naga", level)]
}

/// Maps the numeric `--log-level` onto a filter; anything above 3 traces.
pub fn log_filter_from_level(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        3 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels() {
        assert_eq!(log_filter_from_level(0), LevelFilter::Error);
        assert_eq!(log_filter_from_level(2), LevelFilter::Info);
        assert_eq!(log_filter_from_level(9), LevelFilter::Trace);
        assert_eq!(wgpu_filters(false)[2], ("naga", LevelFilter::Warn));
    }
}
