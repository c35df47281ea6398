mod credential_store;
mod navigator;
mod transport;

pub use credential_store::*;
pub use navigator::*;
pub use transport::*;
