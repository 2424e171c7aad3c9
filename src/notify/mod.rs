pub mod dispatcher;
pub mod event;
pub mod push;

pub use dispatcher::Dispatcher;
pub use event::{NotificationEvent, NotificationKind, Recipient};
