/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit SHA
pub const GIT_SHA: &str = env!("VERGEN_GIT_SHA");

/// Rust compiler version used to build
pub const RUSTC_VERSION: &str = env!("VERGEN_RUSTC_SEMVER");

/// Build timestamp
pub const BUILD_TIMESTAMP: &str = env!("VERGEN_BUILD_TIMESTAMP");

/// Target triple
pub const TARGET: &str = env!("VERGEN_CARGO_TARGET_TRIPLE");

/// Returns the version string with git metadata.
/// Format: <version> (<git_sha>, <target>, rustc <rustc_version>)
pub fn full_version() -> String {
    format!("{VERSION} ({GIT_SHA}, {TARGET}, rustc {RUSTC_VERSION})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_version_carries_build_metadata() {
        let full = full_version();
        assert!(full.starts_with(VERSION));
        assert!(!RUSTC_VERSION.is_empty());
        assert!(full.ends_with(&format!("rustc {RUSTC_VERSION})")));
    }
}
