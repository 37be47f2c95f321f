pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// The service could not be reached, timed out, or refused a lifecycle call.
	#[error("Query service unavailable: {message}")]
	ServiceUnavailable { message: String },
	#[error("Query {query_id} has no ranking yet.")]
	NotReady { query_id: String },
	#[error("Query service rejected the request with status {status}: {message}")]
	Rejected { status: u16, message: String },
	#[error("Invalid response: {message}")]
	InvalidResponse { message: String },
	#[error("Notification stream failed: {message}")]
	Stream { message: String },
	#[error("{message}")]
	InvalidConfig { message: String },
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error(transparent)]
	Domain(#[from] visor_domain::Error),
}
impl Error {
	pub fn is_not_ready(&self) -> bool {
		matches!(self, Self::NotReady { .. })
	}
}
