use crate::core::{Result, SyncError};
use std::time::Duration;

pub const ENV_URL: &str = "STOREFRONT_SYNC_URL";
pub const ENV_KEY: &str = "STOREFRONT_SYNC_KEY";
pub const ENV_TOKEN: &str = "STOREFRONT_SYNC_TOKEN";
pub const ENV_TABLE: &str = "STOREFRONT_SYNC_TABLE";

pub const DEFAULT_TABLE: &str = "favorites";

/// Connection settings for the hosted row API
#[derive(Debug, Clone)]
pub struct RestStoreConfig {
    /// Project URL, e.g. `https://abc.backend.example`
    pub base_url: String,

    /// Public API key, sent as `apikey`
    pub api_key: String,

    /// Signed-in user's access token; falls back to the API key when absent
    pub access_token: Option<String>,

    /// Table holding the collection rows
    pub table: String,

    /// Per-request timeout
    pub timeout: Duration,
}

impl RestStoreConfig {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            access_token: None,
            table: DEFAULT_TABLE.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Set the table name
    pub fn table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    /// Set the bearer token of the signed-in user
    pub fn access_token(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    /// Set request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build from `STOREFRONT_SYNC_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url =
            lookup(ENV_URL).ok_or_else(|| SyncError::Config(format!("{} is not set", ENV_URL)))?;
        let api_key =
            lookup(ENV_KEY).ok_or_else(|| SyncError::Config(format!("{} is not set", ENV_KEY)))?;

        let mut config = Self::new(&base_url, &api_key);
        if let Some(token) = lookup(ENV_TOKEN).filter(|token| !token.is_empty()) {
            config = config.access_token(&token);
        }
        if let Some(table) = lookup(ENV_TABLE) {
            config = config.table(&table);
        }

        config.validate()?;
        Ok(config)
    }

    /// Collection endpoint, `{base_url}/rest/v1/{table}`
    pub fn endpoint(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url.trim_end_matches('/'), self.table)
    }

    /// Token for the `Authorization` header
    pub fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.api_key)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::Config("base_url cannot be empty".to_string()));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(SyncError::Config(format!(
                "base_url must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }

        if self.api_key.is_empty() {
            return Err(SyncError::Config("api_key cannot be empty".to_string()));
        }

        if self.table.trim().is_empty() {
            return Err(SyncError::Config("table cannot be empty".to_string()));
        }

        if self.timeout.is_zero() {
            return Err(SyncError::Config("timeout must be > 0".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = RestStoreConfig::new("https://shop.example/", "anon").table("cart_items");
        assert_eq!(config.endpoint(), "https://shop.example/rest/v1/cart_items");
    }

    #[test]
    fn test_bearer_prefers_access_token() {
        let config = RestStoreConfig::new("https://shop.example", "anon");
        assert_eq!(config.bearer(), "anon");
        assert_eq!(config.access_token("jwt").bearer(), "jwt");
    }

    #[test]
    fn test_validate() {
        assert!(RestStoreConfig::new("https://shop.example", "anon").validate().is_ok());
        assert!(RestStoreConfig::new("", "anon").validate().is_err());
        assert!(RestStoreConfig::new("ftp://shop.example", "anon").validate().is_err());
        assert!(RestStoreConfig::new("https://shop.example", "").validate().is_err());
        assert!(
            RestStoreConfig::new("https://shop.example", "anon")
                .table(" ")
                .validate()
                .is_err()
        );
        assert!(
            RestStoreConfig::new("https://shop.example", "anon")
                .timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_URL, "http://127.0.0.1:54321"),
            (ENV_KEY, "anon"),
            (ENV_TOKEN, ""),
            (ENV_TABLE, "cart_items"),
        ]);
        let config =
            RestStoreConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.table, "cart_items");
        assert_eq!(config.access_token, None);

        let missing = RestStoreConfig::from_lookup(|_| None).unwrap_err();
        assert_eq!(
            missing,
            SyncError::Config(format!("{} is not set", ENV_URL))
        );
    }
}
