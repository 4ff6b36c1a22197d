use std::path::PathBuf;

use tempfile::TempDir;

use crate::config::StoreConfig;

/// Create a fresh temporary directory and a database path inside it.
///
/// The directory is removed when the returned `TempDir` is dropped, so keep
/// it alive for as long as the path is in use.
pub fn test_path() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("test.db");
    (dir, path)
}

/// Thresholds small enough that a handful of short items forces a split.
pub fn split_config() -> StoreConfig {
    StoreConfig::new()
        .with_page_size(4096)
        .with_fill_percents(0.0125, 0.025)
}
