mod error;

pub mod lifecycle;
pub mod pager;
pub mod session;
pub mod view;

pub use error::{Error, Result};
pub use lifecycle::{Action, Lifecycle, Trigger};
pub use pager::{FlagCompletion, FlagOutcome, FlagPatch, LoadMore, PendingCounter, RankingPager, push_flag};
pub use session::{Command, SessionHandle, SessionSettings, start_session};
pub use view::{SessionView, ViewFilters};
