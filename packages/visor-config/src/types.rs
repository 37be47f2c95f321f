use serde::Deserialize;

pub const DEFAULT_NOTIFICATIONS_PATH: &str = "/api/query/notifications";
pub const DEFAULT_FALLBACK_TRAIN_MS: u64 = 20_000;
pub const DEFAULT_COMMAND_BUFFER: usize = 32;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub api: Api,
	#[serde(default)]
	pub lifecycle: Lifecycle,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Api {
	/// Scheme, host and optional path prefix of the query service, e.g. "http://127.0.0.1:8915".
	pub base_url: String,
	/// Per-request timeout for lifecycle calls. The notification stream only uses it as its
	/// connect timeout.
	pub timeout_ms: u64,
	/// Namespace of the server-sent notification stream. Older deployments serve it at
	/// "/api/notifications".
	#[serde(default = "default_notifications_path")]
	pub notifications_path: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Lifecycle {
	/// How long a fresh query may stay in data collection before training is forced.
	#[serde(default = "default_fallback_train_ms")]
	pub fallback_train_ms: u64,
	#[serde(default = "default_command_buffer")]
	pub command_buffer: usize,
}
impl Default for Lifecycle {
	fn default() -> Self {
		Self {
			fallback_train_ms: DEFAULT_FALLBACK_TRAIN_MS,
			command_buffer: DEFAULT_COMMAND_BUFFER,
		}
	}
}

fn default_notifications_path() -> String {
	DEFAULT_NOTIFICATIONS_PATH.to_string()
}

fn default_fallback_train_ms() -> u64 {
	DEFAULT_FALLBACK_TRAIN_MS
}

fn default_command_buffer() -> usize {
	DEFAULT_COMMAND_BUFFER
}
