mod error;

pub mod api;
pub mod notifications;

pub use api::{BoxFuture, HttpQueryApi, QueryApi};
pub use error::{Error, Result};
pub use notifications::{NotificationChannel, NotificationStream, decode_event, for_query};
