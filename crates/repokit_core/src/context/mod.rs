//! Ambient collaborators consulted at checkpoint time.

pub mod clock;
pub mod user;

pub use clock::{Clock, ManualClock, SystemClock};
pub use user::{AnonymousUser, CurrentUserProvider, FixedUser, SYSTEM_USER};
