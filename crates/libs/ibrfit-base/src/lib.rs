//! # ibrfit-base
//! Basic types shared by the ibrfit crates: the error type, fitting settings,
//! progress reporting, and a handful of math helpers.
#![warn(missing_docs)]

pub mod error;
pub mod math;
pub mod progress;
pub mod settings;

pub use error::FitError;

/// Colour channels of the linear RGB data handled by the fitting.
pub const CHANNELS: usize = 3;

/// Names of the colour channels, in storage order.
pub const CHANNEL_NAMES: [&str; CHANNELS] = ["red", "green", "blue"];

/// Utility functions.
pub mod utils {
    use chrono::{DateTime, Local};
    use std::time::Duration;

    /// Returns the current time as an ISO 8601 (RFC 3339) timestamp.
    pub fn iso_timestamp() -> String {
        chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
    }

    /// Returns the given time as an ISO 8601 (RFC 3339) timestamp without the
    /// timezone and the colon in the time field.
    pub fn iso_timestamp_short(datetime: DateTime<Local>) -> String {
        datetime.format("%Y-%m-%dT%H-%M-%S").to_string()
    }

    /// Formats a duration as `h:mm:ss.mmm`.
    pub fn format_duration(duration: Duration) -> String {
        let millis = duration.as_millis() % 1000;
        let seconds = duration.as_secs() % 60;
        let minutes = (duration.as_secs() / 60) % 60;
        let hours = duration.as_secs() / 3600;
        format!("{}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn duration_formatting() {
            assert_eq!(format_duration(Duration::from_millis(0)), "0:00:00.000");
            assert_eq!(
                format_duration(Duration::from_millis(3_723_042)),
                "1:02:03.042"
            );
        }
    }
}
