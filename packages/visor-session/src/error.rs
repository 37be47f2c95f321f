pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Client(#[from] visor_client::Error),
	#[error(transparent)]
	Join(#[from] tokio::task::JoinError),
	#[error("Session is closed.")]
	Closed,
	#[error("Query {query_id} is not ranked yet.")]
	NotRanked { query_id: String },
}
