//! Version metadata embedded by the build script, reported at startup and
//! by `--version`.

/// Short git commit hash, or "unknown" outside a checkout.
pub const GIT_HASH: &str = env!("FWTABLED_GIT_HASH");

/// Cargo profile the binary was built with.
pub const BUILD_PROFILE: &str = env!("FWTABLED_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// e.g. `"0.1.0 (abc1234, release)"`
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}
