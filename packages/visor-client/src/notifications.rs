use std::{fmt::Display, pin::Pin, time::Duration};

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt, future};
use reqwest::{Client, Url, header::ACCEPT};

use crate::{
	Error, Result,
	api::{endpoint, parse_base_url},
};
use visor_domain::{Notification, NotificationWire, QueryId};

/// Server-sent event name carrying query notifications.
pub const NOTIFICATION_EVENT: &str = "notification";

pub type NotificationStream = Pin<Box<dyn Stream<Item = Notification> + Send>>;

/// Shared push channel for every query on the notifications namespace.
///
/// The stream ends when the connection drops. Reconnecting is left to the caller.
#[derive(Clone, Debug)]
pub struct NotificationChannel {
	client: Client,
	url: Url,
}
impl NotificationChannel {
	pub fn new(cfg: &visor_config::Api) -> Result<Self> {
		// No overall timeout: the response body is the long-lived stream.
		let client =
			Client::builder().connect_timeout(Duration::from_millis(cfg.timeout_ms)).build()?;

		Self::with_client(&cfg.base_url, &cfg.notifications_path, client)
	}

	pub fn with_client(base_url: &str, namespace: &str, client: Client) -> Result<Self> {
		let base = parse_base_url(base_url)?;
		let segments: Vec<&str> = namespace.split('/').filter(|part| !part.is_empty()).collect();
		let url = endpoint(&base, &segments)?;

		Ok(Self { client, url })
	}

	pub fn url(&self) -> &Url {
		&self.url
	}

	pub async fn connect(&self) -> Result<NotificationStream> {
		let response = self
			.client
			.get(self.url.clone())
			.header(ACCEPT, "text/event-stream")
			.send()
			.await
			.map_err(|err| Error::Stream {
				message: format!("notification channel connect failed: {err}"),
			})?;
		let status = response.status();

		if !status.is_success() {
			return Err(Error::Stream {
				message: format!("notification channel refused the connection with status {status}"),
			});
		}

		tracing::info!(url = %self.url, "Notification channel connected.");

		let stream =
			response.bytes_stream().eventsource().filter_map(|event| future::ready(accept(event)));

		Ok(Box::pin(stream))
	}
}

/// Decodes one server-sent event. Events with other names yield `None`.
pub fn decode_event(name: &str, data: &str) -> Result<Option<Notification>> {
	if name != NOTIFICATION_EVENT {
		return Ok(None);
	}

	let wire: NotificationWire = serde_json::from_str(data)?;

	Ok(Some(Notification::try_from(wire)?))
}

/// Keeps only the events addressed to `query_id`; the channel is shared with other queries.
pub fn for_query<S>(stream: S, query_id: QueryId) -> impl Stream<Item = Notification> + Send
where
	S: Stream<Item = Notification> + Send,
{
	stream.filter(move |notification| future::ready(notification.query_id == query_id))
}

fn accept<E>(event: std::result::Result<Event, EventStreamError<E>>) -> Option<Notification>
where
	E: Display,
{
	match event {
		Ok(event) => match decode_event(&event.event, &event.data) {
			Ok(notification) => notification,
			Err(err) => {
				tracing::warn!(error = %err, event = %event.event, "Dropping malformed notification.");

				None
			},
		},
		Err(err) => {
			tracing::warn!(error = %err, "Notification stream error.");

			None
		},
	}
}

#[cfg(test)]
mod tests {
	use futures::stream;

	use super::*;
	use visor_domain::{NotificationKind, Stage};

	#[test]
	fn decodes_only_notification_events() {
		let data = r#"{"id":"q1","type":"NTFY_STATE_CHANGE","data":"QS_RANKED"}"#;
		let decoded = decode_event(NOTIFICATION_EVENT, data).expect("Failed to decode event.");

		assert_eq!(decoded, Some(Notification::state_change(QueryId::new("q1"), Stage::Ranked)));
		assert_eq!(decode_event("message", data).expect("Failed to skip event."), None);
	}

	#[test]
	fn malformed_payloads_are_errors() {
		assert!(decode_event(NOTIFICATION_EVENT, "not json").is_err());
		assert!(
			decode_event(NOTIFICATION_EVENT, r#"{"id":"q1","type":"NTFY_STATE_CHANGE","data":"QS_LOST"}"#)
				.is_err()
		);
	}

	#[test]
	fn namespace_is_joined_under_base_path() {
		let channel =
			NotificationChannel::with_client("http://visor.local/app", "/api/notifications", Client::new())
				.expect("Failed to build channel.");

		assert_eq!(channel.url().as_str(), "http://visor.local/app/api/notifications");
	}

	#[tokio::test]
	async fn for_query_drops_foreign_events() {
		let events = stream::iter(vec![
			Notification::state_change(QueryId::new("other"), Stage::Trained),
			Notification::state_change(QueryId::new("mine"), Stage::DataCollectionComplete),
			Notification {
				query_id: QueryId::new("other"),
				kind: NotificationKind::AllImagesProcessed,
			},
			Notification::state_change(QueryId::new("mine"), Stage::Training),
		]);
		let kept: Vec<_> = for_query(events, QueryId::new("mine")).collect().await;

		assert_eq!(
			kept,
			vec![
				Notification::state_change(QueryId::new("mine"), Stage::DataCollectionComplete),
				Notification::state_change(QueryId::new("mine"), Stage::Training),
			]
		);
	}
}
