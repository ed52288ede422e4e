//! On-storage layout of a backup collection.
//!
//! A collection looks like:
//!
//! ```text
//! <collection>/
//!   LATEST                                 legacy pointer (pre write-once)
//!   metadata/latest/LATEST-<hex>           write-once pointers, newest sorts first
//!   2024/03/05-120000.00/BACKUP_MANIFEST   full backup
//!   incrementals/2024/03/05-120000.00/
//!     20240306/120000.00/BACKUP_MANIFEST   incremental layer
//! ```

pub mod encoding;
pub mod path;

use chrono::{DateTime, TimeZone as _, Utc};

pub use path::join_url_path;

/// Object written last by a completed backup.
pub const BACKUP_MANIFEST_NAME: &str = "BACKUP_MANIFEST";

/// Name of the latest pointer, and the alias meaning "most recent subdirectory".
pub const LATEST_FILE_NAME: &str = "LATEST";

/// Directory holding the write-once latest pointers.
pub const LATEST_HISTORY_DIRECTORY: &str = "metadata/latest";

/// Default home of incremental layers inside a collection.
pub const DEFAULT_INCREMENTALS_SUBDIR: &str = "incrementals";

/// Listing delimiter that stops descent into backup data directories.
pub const LISTING_DELIM_DATA_SLASH: &str = "data/";

/// URI query parameter carrying a locality tag.
pub const LOCALITY_URL_PARAM: &str = "COCKROACH_LOCALITY";

/// Locality tag of the unpartitioned URI.
pub const DEFAULT_LOCALITY_VALUE: &str = "default";

fn hundredths(t: &DateTime<Utc>) -> u32 {
    (t.timestamp_subsec_nanos() / 10_000_000).min(99)
}

/// Subdirectory for a new full backup in a collection: `/YYYY/MM/DD-HHMMSS.cc`.
pub fn full_backup_subdir(end_time: &DateTime<Utc>) -> String {
    format!(
        "/{}.{:02}",
        end_time.format("%Y/%m/%d-%H%M%S"),
        hundredths(end_time)
    )
}

/// Folder of an incremental layer below its full backup: `/YYYYMMDD/HHMMSS.cc`.
pub fn incremental_subdir(end_time: &DateTime<Utc>) -> String {
    format!(
        "/{}.{:02}",
        end_time.format("%Y%m%d/%H%M%S"),
        hundredths(end_time)
    )
}

/// Fixed-width UTC rendering used inside write-once pointer names.
///
/// Every field is zero padded so byte order matches time order.
pub fn pointer_timestamp(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S%.9f +0000 UTC").to_string()
}

/// Parse a timestamp produced by [`pointer_timestamp`].
pub fn parse_pointer_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let trimmed = s.strip_suffix(" +0000 UTC")?;
    let naive = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.9f").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}
