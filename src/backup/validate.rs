//! Validation functions for configuration values.
//!
//! Provides custom validation functions for world names, directories and
//! date formats.

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::fmt::Write;
use std::path::Path;

pub fn validate_world_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() || name == "latest" || !is_sanitized(name) {
        return Err(ValidationError::new("InvalidWorldName").with_message(
            format!("Invalid world name {name:?}, try sanitizing like {:?}", sanitize(name)).into(),
        ));
    }

    Ok(())
}

/// Accepts a missing directory, it is created on first write.
pub fn validate_dir_if_exists<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() && !dir.is_dir() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} is not a directory", dir).into()));
    }

    Ok(())
}

/// The format must render a timestamp that parses back, since backup names
/// are read back with it.
pub fn validate_date_format<S: AsRef<str>>(format: S) -> Result<(), ValidationError> {
    let format = format.as_ref();
    let invalid = |reason: &str| {
        ValidationError::new("InvalidDateFormat")
            .with_message(format!("Invalid date format {format:?}: {reason}").into())
    };
    if format.is_empty() || format.contains('/') {
        return Err(invalid("must be non-empty and must not contain '/'"));
    }

    let sample = Utc
        .with_ymd_and_hms(2001, 2, 3, 4, 5, 6)
        .single()
        .ok_or_else(|| invalid("cannot build sample timestamp"))?;
    let mut rendered = String::new();
    write!(rendered, "{}", sample.format(format)).map_err(|_| invalid("cannot be rendered"))?;

    let round_trips = NaiveDateTime::parse_from_str(&rendered, format)
        .map(|dt| dt.date() == sample.date_naive())
        .or_else(|_| {
            NaiveDate::parse_from_str(&rendered, format).map(|date| date == sample.date_naive())
        })
        .unwrap_or(false);
    if !round_trips {
        return Err(invalid("rendered timestamps don't parse back"));
    }

    Ok(())
}
