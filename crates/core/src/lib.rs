//! Core publication logic: credentials, publishing and review tasks.

pub mod clock;
pub mod provider;
pub mod services;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use services::*;
pub use store::{LocationStore, PostStore, ReviewStore};
