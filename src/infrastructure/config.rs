use crate::infrastructure::error::InfraError;
use crate::infrastructure::retry::RetryPolicy;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const BACKEND_JSON: &str = "backend.json";
const DEFAULT_GENERIC_LABEL: &str = "Work";
const DEFAULT_LIVE_SYNC_INTERVAL_SECONDS: u64 = 15;
const DEFAULT_TICK_INTERVAL_MILLIS: u64 = 1000;
const DEFAULT_API_KEY_ENV: &str = "TIMEGRID_API_KEY";

#[derive(Debug)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub backend: serde_json::Value,
}

/// Typed view over `app.json`.
#[derive(Debug, Clone, PartialEq)]
pub struct AppSettings {
    pub app_name: String,
    pub timezone: Tz,
    pub generic_work_label: String,
    pub live_sync_interval: Duration,
    pub tick_interval: Duration,
}

/// Typed view over `backend.json`. `rest_url == None` means the local store
/// is authoritative.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSettings {
    pub rest_url: Option<String>,
    pub api_key_env: String,
    pub retry: RetryPolicy,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "TimeGrid",
                "timezone": "UTC",
                "genericWorkLabel": DEFAULT_GENERIC_LABEL,
                "liveSyncIntervalSeconds": DEFAULT_LIVE_SYNC_INTERVAL_SECONDS,
                "tickIntervalMillis": DEFAULT_TICK_INTERVAL_MILLIS
            }),
        ),
        (
            BACKEND_JSON,
            serde_json::json!({
                "schema": 1,
                "restUrl": null,
                "apiKeyEnv": DEFAULT_API_KEY_ENV,
                "retry": {
                    "maxAttempts": 3,
                    "baseDelayMs": 200
                }
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        backend: read_config(&config_dir.join(BACKEND_JSON))?,
    })
}

fn trimmed_str<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn parse_timezone(raw: Option<&str>) -> Result<Tz, InfraError> {
    let Some(name) = raw else {
        return Ok(Tz::UTC);
    };
    name.parse::<Tz>()
        .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone '{name}': {error}")))
}

pub fn read_app_settings(config_dir: &Path) -> Result<AppSettings, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;

    let live_sync_seconds = app
        .get("liveSyncIntervalSeconds")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(DEFAULT_LIVE_SYNC_INTERVAL_SECONDS);
    if live_sync_seconds == 0 {
        return Err(InfraError::InvalidConfig(
            "liveSyncIntervalSeconds must be > 0".to_string(),
        ));
    }
    let tick_millis = app
        .get("tickIntervalMillis")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(DEFAULT_TICK_INTERVAL_MILLIS);
    if tick_millis == 0 {
        return Err(InfraError::InvalidConfig(
            "tickIntervalMillis must be > 0".to_string(),
        ));
    }

    Ok(AppSettings {
        app_name: trimmed_str(&app, "appName").unwrap_or("TimeGrid").to_string(),
        timezone: parse_timezone(trimmed_str(&app, "timezone"))?,
        generic_work_label: trimmed_str(&app, "genericWorkLabel")
            .unwrap_or(DEFAULT_GENERIC_LABEL)
            .to_string(),
        live_sync_interval: Duration::from_secs(live_sync_seconds),
        tick_interval: Duration::from_millis(tick_millis),
    })
}

pub fn read_backend_settings(config_dir: &Path) -> Result<BackendSettings, InfraError> {
    let backend = read_config(&config_dir.join(BACKEND_JSON))?;
    let defaults = RetryPolicy::default();
    let retry = backend.get("retry");
    let max_attempts = retry
        .and_then(|retry| retry.get("maxAttempts"))
        .and_then(serde_json::Value::as_u64)
        .map(|value| value.clamp(1, u8::MAX as u64) as u8)
        .unwrap_or(defaults.max_attempts);
    let base_delay_ms = retry
        .and_then(|retry| retry.get("baseDelayMs"))
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(defaults.base_delay_ms);

    Ok(BackendSettings {
        rest_url: trimmed_str(&backend, "restUrl").map(ToOwned::to_owned),
        api_key_env: trimmed_str(&backend, "apiKeyEnv")
            .unwrap_or(DEFAULT_API_KEY_ENV)
            .to_string(),
        retry: RetryPolicy {
            max_attempts,
            base_delay_ms,
        },
    })
}

pub fn save_rest_url(config_dir: &Path, rest_url: Option<&str>) -> Result<(), InfraError> {
    let path = config_dir.join(BACKEND_JSON);
    let mut backend = read_config(&path)?;
    let object = backend.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    let value = match rest_url.map(str::trim).filter(|value| !value.is_empty()) {
        Some(url) => {
            url::Url::parse(url)
                .map_err(|error| InfraError::InvalidConfig(format!("invalid restUrl '{url}': {error}")))?;
            serde_json::Value::String(url.to_string())
        }
        None => serde_json::Value::Null,
    };
    object.insert("restUrl".to_string(), value);

    let formatted = serde_json::to_string_pretty(&backend)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}
