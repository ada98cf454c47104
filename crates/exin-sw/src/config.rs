//! Agent configuration.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::strategy::is_same_origin;
use crate::AgentError;

/// Default bucket name for the current release.
pub const DEFAULT_CACHE_NAME: &str = "exin-cache-v5";

/// Default fallback document for offline navigations.
pub const DEFAULT_OFFLINE_DOCUMENT: &str = "./index.html";

/// Default precache manifest.
pub const DEFAULT_ASSETS: &[&str] = &[
    "./",
    "./index.html",
    "./manifest.webmanifest",
    "./icons/icon-180.png",
    "./icons/icon-192.png",
    "./icons/icon-512.png",
];

/// Offline agent configuration.
///
/// Bump `cache_name` on every release: activation deletes every bucket
/// with a different name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL the agent serves. Relative paths resolve against it.
    pub scope: Url,

    /// Name of the current bucket.
    pub cache_name: String,

    /// Paths precached on install, in order.
    pub assets: Vec<String>,

    /// Document served to navigations when the network is down.
    pub offline_document: String,

    /// Skip the waiting phase after install.
    pub skip_waiting: bool,

    /// Take control of open clients on activation.
    pub claim_clients: bool,
}

impl AgentConfig {
    /// Create a configuration with the default manifest.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            assets: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
            offline_document: DEFAULT_OFFLINE_DOCUMENT.to_string(),
            skip_waiting: true,
            claim_clients: true,
        }
    }

    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    pub fn with_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assets = assets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_offline_document(mut self, path: impl Into<String>) -> Self {
        self.offline_document = path.into();
        self
    }

    /// Resolve a path against the scope.
    pub fn resolve(&self, path: &str) -> Result<Url, AgentError> {
        self.scope
            .join(path)
            .map_err(|e| AgentError::Config(format!("cannot resolve {path:?}: {e}")))
    }

    /// Absolute URLs of the manifest, in order.
    pub fn asset_urls(&self) -> Result<Vec<Url>, AgentError> {
        self.assets.iter().map(|p| self.resolve(p)).collect()
    }

    /// Absolute URL of the offline document.
    pub fn offline_document_url(&self) -> Result<Url, AgentError> {
        self.resolve(&self.offline_document)
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.cache_name.trim().is_empty() {
            return Err(AgentError::Config("cache name is empty".to_string()));
        }
        if self.scope.cannot_be_a_base() {
            return Err(AgentError::Config(format!(
                "scope {} cannot be a base URL",
                self.scope
            )));
        }

        let offline = self.offline_document_url()?;
        for url in self.asset_urls()?.iter().chain(std::iter::once(&offline)) {
            if !is_same_origin(&self.scope, url) {
                return Err(AgentError::Config(format!(
                    "{url} is outside the origin of {}",
                    self.scope
                )));
            }
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, AgentError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| AgentError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, AgentError> {
        serde_json::to_string_pretty(self).map_err(|e| AgentError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Url {
        Url::parse("https://exin.example/app/").unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::new(scope());
        assert_eq!(config.cache_name, "exin-cache-v5");
        assert_eq!(config.assets.len(), 6);
        assert_eq!(config.offline_document, "./index.html");
        assert!(config.skip_waiting);
        assert!(config.claim_clients);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_asset_urls_resolve_against_scope() {
        let config = AgentConfig::new(scope()).with_assets(["./", "./index.html"]);
        let urls = config.asset_urls().unwrap();
        assert_eq!(urls[0].as_str(), "https://exin.example/app/");
        assert_eq!(urls[1].as_str(), "https://exin.example/app/index.html");
        assert_eq!(
            config.offline_document_url().unwrap().as_str(),
            "https://exin.example/app/index.html"
        );
    }

    #[test]
    fn test_rejects_empty_cache_name() {
        let config = AgentConfig::new(scope()).with_cache_name("  ");
        assert!(matches!(config.validate(), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_rejects_cross_origin_asset() {
        let config = AgentConfig::new(scope()).with_assets(["https://cdn.example/lib.js"]);
        assert!(matches!(config.validate(), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_rejects_non_base_scope() {
        let config = AgentConfig::new(Url::parse("data:text/plain,hi").unwrap());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = AgentConfig::new(scope()).with_cache_name("exin-cache-v6");
        let json = config.to_json().unwrap();
        assert_eq!(AgentConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_from_json_validates() {
        let json = r#"{
            "scope": "https://exin.example/",
            "cache_name": "",
            "assets": [],
            "offline_document": "./index.html",
            "skip_waiting": true,
            "claim_clients": true
        }"#;
        assert!(matches!(
            AgentConfig::from_json(json),
            Err(AgentError::Config(_))
        ));
    }
}
