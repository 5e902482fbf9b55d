//! Distribution mirror addressing.
//!
//! Archives are addressed deterministically from the version:
//! `<base>/v<major>.x/linux-<version>.tar.xz`. Two legacy branches predate
//! the `v<major>.x` scheme and keep their own directories: 2.6.* archives
//! live under `v2.6/` and 3.0.* under `v3.0/`.

use crate::version::KernelVersion;

pub const DEFAULT_MIRROR_BASE: &str = "https://cdn.kernel.org/pub/linux/kernel";

pub const ARCHIVE_EXT: &str = "tar.xz";

/// Mirror directory a version's archive lives in.
pub fn branch_dir(version: &KernelVersion) -> String {
    let raw = version.as_str();
    if raw == "2.6" || raw.starts_with("2.6.") {
        return "v2.6".to_string();
    }
    if raw == "3.0" || raw.starts_with("3.0.") {
        return "v3.0".to_string();
    }
    format!("v{}.x", version.major())
}

/// Archive file name for a version.
pub fn archive_name(version: &KernelVersion) -> String {
    format!("linux-{}.{}", version, ARCHIVE_EXT)
}

/// Full download URL for a version's archive.
pub fn archive_url(base: &str, version: &KernelVersion) -> String {
    format!(
        "{}/{}/{}",
        base.trim_end_matches('/'),
        branch_dir(version),
        archive_name(version)
    )
}

/// Top-level directory the archive extracts to.
pub fn extracted_dir_name(version: &KernelVersion) -> String {
    format!("linux-{}", version)
}
