/// Version metadata shown by `nasvm version`.
#[derive(Debug, Clone, PartialEq, Eq, facet::Facet)]
pub struct BuildInfo {
    pub version: String,
    pub commit: String,
    pub date: String,
}

impl BuildInfo {
    /// From the package version and the optional `NASVM_COMMIT` /
    /// `NASVM_BUILD_DATE` variables set at compile time.
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: option_env!("NASVM_COMMIT").unwrap_or("unknown").to_string(),
            date: option_env!("NASVM_BUILD_DATE").unwrap_or("unknown").to_string(),
        }
    }
}

impl std::fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "nasvm {} (commit {}, built {})",
            self.version, self.commit, self.date
        )
    }
}
