mod engagement;
mod post;
mod query;
mod record;
mod token;
mod user;

pub use engagement::*;
pub use post::*;
pub use query::*;
pub use record::*;
pub use token::*;
pub use user::*;
