// Artifact stamps: `{database}_{stamp}.sql` where stamp is `YYYYMMDDTHHMMSS`
// optionally followed by `-N` when an earlier artifact took the plain name.
use chrono::{DateTime, NaiveDateTime, Utc};

pub const ARTIFACT_EXTENSION: &str = "sql";
const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Formats a backup start time with second precision and no `_`.
pub fn backup_stamp(at: DateTime<Utc>) -> String {
    at.format(STAMP_FORMAT).to_string()
}

/// Stamp with a collision suffix. `attempt == 0` is the plain stamp.
pub fn suffixed_stamp(stamp: &str, attempt: u32) -> String {
    if attempt == 0 {
        stamp.to_string()
    } else {
        format!("{}-{}", stamp, attempt)
    }
}

pub fn artifact_file_name(database_name: &str, stamp: &str) -> String {
    format!("{}_{}.{}", database_name, stamp, ARTIFACT_EXTENSION)
}

/// Checks that `stamp` looks like something `backup_stamp`/`suffixed_stamp` produced.
/// Anything else (path separators, dots, free text) is rejected.
pub fn is_valid_stamp(stamp: &str) -> bool {
    let (base, suffix) = match stamp.split_once('-') {
        Some((base, suffix)) => (base, Some(suffix)),
        None => (stamp, None),
    };
    if base.len() != 15 || NaiveDateTime::parse_from_str(base, STAMP_FORMAT).is_err() {
        return false;
    }
    match suffix {
        Some(s) => !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) && !s.starts_with('0'),
        None => true,
    }
}

/// Extracts the stamp from an artifact file name belonging to `database_name`.
pub fn stamp_from_file_name<'a>(database_name: &str, file_name: &'a str) -> Option<&'a str> {
    let rest = file_name.strip_prefix(database_name)?.strip_prefix('_')?;
    let stamp = rest.strip_suffix(ARTIFACT_EXTENSION)?.strip_suffix('.')?;
    is_valid_stamp(stamp).then_some(stamp)
}
