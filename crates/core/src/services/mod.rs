//! Business logic services.

#![allow(missing_docs)]

pub mod credentials;
pub mod publisher;
pub mod reviews;

pub use credentials::{CredentialError, CredentialRefresher};
pub use publisher::{PublishError, PublishExecutor, PublishOutcome, SkipReason};
pub use reviews::{AutoReplier, ReplyComposer, ReviewPoller, ReviewTaskError, TemplateReplyComposer};
