//! Version information reported by the health endpoint.

pub const CARTOPHONE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub cartophone: &'static str,
    /// PocketBase server the service talks to, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pocketbase_url: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            cartophone: CARTOPHONE_VERSION,
            pocketbase_url: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pocketbase_url(mut self, url: impl Into<String>) -> Self {
        self.pocketbase_url = Some(url.into());
        self
    }
}
