mod engagement_service_impl;
mod feed_service_impl;
mod optimistic_cache;
mod session_service_impl;

pub use engagement_service_impl::*;
pub use feed_service_impl::*;
pub use optimistic_cache::*;
pub use session_service_impl::*;
