//! Database entities.

#![allow(missing_docs)]

pub mod location;
pub mod post;
pub mod review;

pub use location::Entity as Location;
pub use post::Entity as Post;
pub use review::Entity as Review;
