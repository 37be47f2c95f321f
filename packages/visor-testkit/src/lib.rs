mod backend;
mod error;
mod spy;

pub use backend::{Endpoint, FakeBackend};
pub use error::{Error, Result};
pub use spy::{SpyQueryApi, sample_items, sample_page};
