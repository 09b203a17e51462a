/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Stable identity of an item: its source path relative to the scan root.
pub type ItemId = String;
