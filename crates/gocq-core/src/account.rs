//! Per-account gateway settings

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Immutable settings for one bot account.
///
/// `password` and `config_extra` are credentials/configuration the gateway
/// needs and are never exposed through [`ProcessAccount`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccountConfig {
    pub uin: u64,

    #[serde(default)]
    pub password: Option<String>,

    /// Free-form overrides merged into the gateway config
    #[serde(default)]
    pub config_extra: Option<Map<String, Value>>,

    /// Free-form device description written to `device.json`
    #[serde(default)]
    pub device_extra: Option<Map<String, Value>>,
}

impl AccountConfig {
    pub fn new(uin: u64) -> Self {
        Self {
            uin,
            password: None,
            config_extra: None,
            device_extra: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_config_extra(mut self, extra: Map<String, Value>) -> Self {
        self.config_extra = Some(extra);
        self
    }

    pub fn with_device_extra(mut self, extra: Map<String, Value>) -> Self {
        self.device_extra = Some(extra);
        self
    }

    /// Device metadata as handed to the gateway (empty object when unset)
    pub fn device(&self) -> Value {
        Value::Object(self.device_extra.clone().unwrap_or_default())
    }

    /// Public view of this account
    pub fn metadata(&self) -> ProcessAccount {
        ProcessAccount {
            uin: self.uin,
            has_password: self.password.is_some(),
            device: self.device(),
        }
    }
}

/// Account metadata safe to return to API callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessAccount {
    pub uin: u64,
    pub has_password: bool,
    pub device: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_device_defaults_to_empty_object() {
        let account = AccountConfig::new(10001);
        assert_eq!(account.device(), json!({}));
    }

    #[test]
    fn test_metadata_excludes_secrets() {
        let mut config = Map::new();
        config.insert("servers".into(), json!([{"http": {"port": 5700}}]));
        let account = AccountConfig::new(10001)
            .with_password("hunter2")
            .with_config_extra(config);

        let meta = account.metadata();
        assert_eq!(meta.uin, 10001);
        assert!(meta.has_password);

        let json = serde_json::to_string(&meta).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("servers"));
    }

    #[test]
    fn test_deserialize_minimal() {
        let account: AccountConfig = serde_json::from_value(json!({"uin": 42})).unwrap();
        assert_eq!(account, AccountConfig::new(42));
    }

    #[test]
    fn test_device_extra_round_trips_into_device() {
        let mut device = Map::new();
        device.insert("protocol".into(), json!(5));
        let account = AccountConfig::new(1).with_device_extra(device);
        assert_eq!(account.device()["protocol"], 5);
    }
}
