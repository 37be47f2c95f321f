mod error;

pub mod notification;
pub mod query;
pub mod ranking;
pub mod stage;

pub use error::{Error, Result};
pub use notification::{Notification, NotificationKind, NotificationWire};
pub use query::{QueryId, QueryText, ResultRoute};
pub use ranking::{PrecisionStats, RankingItem, RankingPage};
pub use stage::Stage;
