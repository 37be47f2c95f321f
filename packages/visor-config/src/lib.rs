mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Api, Config, DEFAULT_COMMAND_BUFFER, DEFAULT_FALLBACK_TRAIN_MS, DEFAULT_NOTIFICATIONS_PATH,
	Lifecycle, Service,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}

	let base_url = cfg.api.base_url.as_str();

	if base_url.is_empty() {
		return Err(Error::Validation { message: "api.base_url must be non-empty.".to_string() });
	}
	if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
		return Err(Error::Validation {
			message: "api.base_url must start with http:// or https://.".to_string(),
		});
	}
	if cfg.api.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "api.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if !cfg.api.notifications_path.starts_with('/') {
		return Err(Error::Validation {
			message: "api.notifications_path must start with '/'.".to_string(),
		});
	}
	if cfg.lifecycle.fallback_train_ms == 0 {
		return Err(Error::Validation {
			message: "lifecycle.fallback_train_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.lifecycle.command_buffer == 0 {
		return Err(Error::Validation {
			message: "lifecycle.command_buffer must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	let trimmed = cfg.api.base_url.trim().trim_end_matches('/').to_string();

	cfg.api.base_url = trimmed;
	cfg.api.notifications_path = cfg.api.notifications_path.trim().to_string();

	if cfg.api.notifications_path.is_empty() {
		cfg.api.notifications_path = DEFAULT_NOTIFICATIONS_PATH.to_string();
	}
}
