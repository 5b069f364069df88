//! # Configuration Sources
//!
//! `config` crate sources backed by the secret store and by an App
//! Configuration store. Keys are lower-cased and use `.` as the section
//! separator, so `ConnectionStrings--AppConfig` in a vault and
//! `ConnectionStrings:AppConfig` in App Configuration both read as
//! `connectionstrings.appconfig`.

pub mod app_config;
pub mod keyvault;

pub use app_config::{
    AppConfigConnection, AppConfigurationClient, AppConfigurationSource, KeyValue, SentinelWatcher,
    APP_CONFIG_API_VERSION, DEFAULT_SENTINEL_KEY,
};
pub use keyvault::KeyVaultSource;

/// Default configuration key holding the App Configuration connection string.
pub const DEFAULT_APP_CONFIG_KEY: &str = "ConnectionStrings:AppConfig";

/// Vault secret name to configuration key (`--` separates sections).
pub fn keyvault_key(secret_name: &str) -> String {
    secret_name.replace("--", ".").to_ascii_lowercase()
}

/// App Configuration key, or a `Section:Key` lookup path, to configuration key.
pub fn app_config_key(key: &str) -> String {
    key.replace(':', ".").to_ascii_lowercase()
}

/// Environment variable fallback for a `Section:Key` path (`Section__Key`).
pub fn env_var_name(key: &str) -> String {
    key.replace(':', "__")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert_eq!(keyvault_key("ConnectionStrings--AppConfig"), "connectionstrings.appconfig");
        assert_eq!(keyvault_key("Plain"), "plain");
        assert_eq!(app_config_key("ConnectionStrings:AppConfig"), "connectionstrings.appconfig");
        assert_eq!(app_config_key("Logging:LogLevel:Default"), "logging.loglevel.default");
        assert_eq!(env_var_name(DEFAULT_APP_CONFIG_KEY), "ConnectionStrings__AppConfig");
    }
}
