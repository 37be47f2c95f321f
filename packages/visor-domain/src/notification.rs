use serde::{Deserialize, Serialize};

use crate::{Error, QueryId, Result, Stage};

pub const NTFY_STATE_CHANGE: &str = "NTFY_STATE_CHANGE";
pub const NTFY_IMAGE_PROCESSED: &str = "NTFY_IMAGE_PROCESSED";
pub const NTFY_ALL_IMAGES_PROCESSED: &str = "NTFY_ALL_IMAGES_PROCESSED";
pub const NTFY_ERROR: &str = "NTFY_ERROR";

/// Push event about one query's progress.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
	pub query_id: QueryId,
	pub kind: NotificationKind,
}
impl Notification {
	pub fn state_change(query_id: QueryId, stage: Stage) -> Self {
		Self { query_id, kind: NotificationKind::StateChange(stage) }
	}

	pub fn to_wire(&self) -> NotificationWire {
		let (kind, data) = match &self.kind {
			NotificationKind::StateChange(stage) =>
				(NTFY_STATE_CHANGE, Some(stage.wire_name().to_string())),
			NotificationKind::ImageProcessed(item) => (NTFY_IMAGE_PROCESSED, Some(item.clone())),
			NotificationKind::AllImagesProcessed => (NTFY_ALL_IMAGES_PROCESSED, None),
			NotificationKind::Error(message) => (NTFY_ERROR, Some(message.clone())),
		};

		NotificationWire { id: self.query_id.clone(), kind: kind.to_string(), data }
	}
}

#[derive(Clone, Debug, PartialEq)]
pub enum NotificationKind {
	StateChange(Stage),
	/// A training image finished processing; carries the image reference.
	ImageProcessed(String),
	AllImagesProcessed,
	/// Backend-side failure for the query.
	Error(String),
}

/// JSON shape of a `notification` event: `{id, type, data}`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct NotificationWire {
	pub id: QueryId,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<String>,
}

impl TryFrom<NotificationWire> for Notification {
	type Error = Error;

	fn try_from(wire: NotificationWire) -> Result<Self> {
		let NotificationWire { id, kind: raw_kind, data } = wire;
		let require_data = |data: Option<String>| {
			data.ok_or_else(|| Error::MissingNotificationData { kind: raw_kind.clone() })
		};
		let kind = match raw_kind.as_str() {
			NTFY_STATE_CHANGE => NotificationKind::StateChange(require_data(data)?.parse()?),
			NTFY_IMAGE_PROCESSED => NotificationKind::ImageProcessed(require_data(data)?),
			NTFY_ALL_IMAGES_PROCESSED => NotificationKind::AllImagesProcessed,
			NTFY_ERROR => NotificationKind::Error(data.unwrap_or_default()),
			_ => return Err(Error::UnknownNotification { value: raw_kind }),
		};

		Ok(Self { query_id: id, kind })
	}
}
