mod parsing;
mod settings;
mod types;

pub use types::{
    ApiSettings, AutosaveSettings, BaseUrl, ConfigError, Environment, RuntimeSettings, Settings,
    TelemetrySettings, TimerSettings,
};
