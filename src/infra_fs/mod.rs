mod credential_store_file;

pub use credential_store_file::*;
