//! Version strings for `--version` and the status endpoint.
//!
//! Release builds may set `PROCPOOL_GIT_REV` at compile time to embed the
//! source revision.

use std::sync::LazyLock;

pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Source revision baked in at build time (empty when unset).
pub const GIT_REV: &str = match option_env!("PROCPOOL_GIT_REV") {
    Some(rev) => rev,
    None => "",
};

static FULL_VERSION: LazyLock<String> = LazyLock::new(|| {
    if GIT_REV.is_empty() {
        PKG_VERSION.to_string()
    } else {
        format!("{} ({})", PKG_VERSION, GIT_REV)
    }
});

/// `"X.Y.Z"` or `"X.Y.Z (rev)"`.
pub fn full_version() -> String {
    FULL_VERSION.clone()
}

/// Static form of [`full_version`] for clap's `version` attribute.
pub fn clap_version() -> &'static str {
    FULL_VERSION.as_str()
}
