mod engagement_service;
mod error;
mod feed_service;
mod session_service;

pub use engagement_service::*;
pub use error::*;
pub use feed_service::*;
pub use session_service::*;
