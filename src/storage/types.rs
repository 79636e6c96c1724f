//! Storage types

use serde::{Deserialize, Serialize};

/// Where a transferred file ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Backend identifier (object key or relative path)
    pub id: String,
    pub name: String,
    /// View link for the stored file
    pub link: String,
}

/// Backend key for a stored file: `{folder}/{unique}/{file_name}`
///
/// Empty, `.` and `..` segments of the folder are dropped so the key never
/// climbs out of the sink root.
pub fn object_key(destination_folder: &str, unique: &str, file_name: &str) -> String {
    destination_folder
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .chain([unique, file_name])
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a base URL and an object key, percent-encoding each key segment
pub fn link_for(base_url: &str, key: &str) -> String {
    let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
    format!("{}/{}", base_url.trim_end_matches('/'), encoded.join("/"))
}
