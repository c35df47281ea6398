mod credential_store_memory;
mod navigator_impl;
mod transport_fake;

pub use credential_store_memory::*;
pub use navigator_impl::*;
pub use transport_fake::*;
