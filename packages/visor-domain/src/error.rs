pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Unknown query stage {value:?}.")]
	UnknownStage { value: String },
	#[error("Unknown notification type {value:?}.")]
	UnknownNotification { value: String },
	#[error("Notification {kind} is missing its data field.")]
	MissingNotificationData { kind: String },
	#[error("Invalid query text: {message}")]
	InvalidQueryText { message: String },
	#[error("Invalid result route: {message}")]
	InvalidRoute { message: String },
}
