//! Database repositories.

mod location;
mod post;
mod review;

pub use location::{LocationRepository, TokenUpdate};
pub use post::{PostRepository, StatusTransition};
pub use review::{ReviewRepository, ReviewUpsert};
