mod cache;
mod change_notification;
mod document;
mod log_sink;
mod result;
mod session;
mod transition;

pub use cache::*;
pub use change_notification::*;
pub use document::*;
pub use log_sink::*;
pub use result::*;
pub use session::*;
pub use transition::*;
