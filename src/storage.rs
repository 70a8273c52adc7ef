// SPDX-License-Identifier: MPL-2.0

//! Storage utilities for naming captured stills and recordings

use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory captures go to when nothing is configured
///
/// The user's picture directory if the platform has one, otherwise the
/// current directory.
pub fn default_capture_dir() -> PathBuf {
    dirs::picture_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// `<dir>/<prefix>_<YYYYmmdd_HHMMSS_mmm><suffix>`
pub fn timestamped_path(dir: &Path, prefix: &str, suffix: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f");
    let path = dir.join(format!("{}_{}{}", prefix, stamp, suffix));
    debug!(path = %path.display(), "Generated capture path");
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{PICTURE_PREFIX, SUFFIX_PNG};

    #[test]
    fn test_timestamped_path_shape() {
        let path = timestamped_path(Path::new("/tmp/captures"), PICTURE_PREFIX, SUFFIX_PNG);
        assert_eq!(path.parent(), Some(Path::new("/tmp/captures")));

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("picture_"));
        assert!(name.ends_with(".png"));
    }
}
