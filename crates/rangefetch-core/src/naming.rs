//! Output-path derivation for transfers built from a bare URL

use std::path::{Path, PathBuf};
use url::Url;

/// Stable file name for a URL: MD5 hex digest plus the URL path's extension.
///
/// The query and fragment never contribute to the extension. URLs that do
/// not parse get the bare digest.
pub fn output_name(url: &str) -> String {
    let mut name = format!("{:x}", md5::compute(url.as_bytes()));
    if let Ok(parsed) = Url::parse(url) {
        if let Some(ext) = path_extension(parsed.path()) {
            name.push_str(ext);
        }
    }
    name
}

/// `dir` joined with [`output_name`]
pub fn output_path(dir: impl AsRef<Path>, url: &str) -> PathBuf {
    dir.as_ref().join(output_name(url))
}

/// Extension of the last path segment, dot included
fn path_extension(path: &str) -> Option<&str> {
    let segment = path.rsplit('/').next()?;
    segment.rfind('.').map(|idx| &segment[idx..])
}
