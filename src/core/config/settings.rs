use std::path::PathBuf;

use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_environment, parse_i64, parse_u64,
};
use super::types::{
    ApiSettings, AutosaveSettings, BaseUrl, ConfigError, RuntimeSettings, Settings,
    TelemetrySettings, TimerSettings,
};

const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v1";
const DEFAULT_TOKEN_FILE: &str = ".exam_token";

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let environment = parse_environment(
            env_optional("EXAM_CLIENT_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );

        let base_url = env_or_default("EXAM_API_BASE_URL", DEFAULT_BASE_URL);
        let timeout_seconds = parse_u64(
            "EXAM_API_TIMEOUT_SECONDS",
            env_or_default("EXAM_API_TIMEOUT_SECONDS", "30"),
        )?;
        let trailing_slash = env_optional("EXAM_API_TRAILING_SLASH")
            .map(|value| parse_bool(&value))
            .unwrap_or(false);
        let token_file = PathBuf::from(env_or_default("EXAM_TOKEN_FILE", DEFAULT_TOKEN_FILE));

        let debounce_ms =
            parse_u64("AUTOSAVE_DEBOUNCE_MS", env_or_default("AUTOSAVE_DEBOUNCE_MS", "2000"))?;
        let interval_ms =
            parse_u64("AUTOSAVE_INTERVAL_MS", env_or_default("AUTOSAVE_INTERVAL_MS", "30000"))?;
        let saved_display_ms = parse_u64(
            "AUTOSAVE_SAVED_DISPLAY_MS",
            env_or_default("AUTOSAVE_SAVED_DISPLAY_MS", "2000"),
        )?;
        let retry_max_ms =
            parse_u64("AUTOSAVE_RETRY_MAX_MS", env_or_default("AUTOSAVE_RETRY_MAX_MS", "30000"))?;

        let warning_seconds =
            parse_i64("TIMER_WARNING_SECONDS", env_or_default("TIMER_WARNING_SECONDS", "300"))?;
        let critical_seconds =
            parse_i64("TIMER_CRITICAL_SECONDS", env_or_default("TIMER_CRITICAL_SECONDS", "60"))?;

        let log_level = env_or_default("EXAM_CLIENT_LOG_LEVEL", "info");
        let json =
            env_optional("EXAM_CLIENT_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            runtime: RuntimeSettings { environment },
            api: ApiSettings {
                base_url: BaseUrl::parse(base_url)?,
                timeout_seconds,
                trailing_slash,
                token_file,
            },
            autosave: AutosaveSettings { debounce_ms, interval_ms, saved_display_ms, retry_max_ms },
            timer: TimerSettings { warning_seconds, critical_seconds },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub fn autosave(&self) -> &AutosaveSettings {
        &self.autosave
    }

    pub fn timer(&self) -> &TimerSettings {
        &self.timer
    }

    pub fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "EXAM_API_TIMEOUT_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.autosave.debounce_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "AUTOSAVE_DEBOUNCE_MS",
                value: "0".to_string(),
            });
        }

        if self.autosave.interval_ms < self.autosave.debounce_ms {
            return Err(ConfigError::InvalidValue {
                field: "AUTOSAVE_INTERVAL_MS",
                value: self.autosave.interval_ms.to_string(),
            });
        }

        if self.autosave.retry_max_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "AUTOSAVE_RETRY_MAX_MS",
                value: "0".to_string(),
            });
        }

        if self.timer.critical_seconds < 0
            || self.timer.critical_seconds > self.timer.warning_seconds
        {
            return Err(ConfigError::InvalidValue {
                field: "TIMER_CRITICAL_SECONDS",
                value: self.timer.critical_seconds.to_string(),
            });
        }

        if self.runtime.environment.is_production()
            && self.api.base_url.as_str().starts_with("http://")
        {
            tracing::warn!(
                base_url = %self.api.base_url.as_str(),
                "Production client is configured with a plaintext API base url"
            );
        }

        Ok(())
    }
}
