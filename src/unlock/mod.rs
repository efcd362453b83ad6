//! Unlock state machine, failed-attempt lockout, and the clock they share.

pub mod clock;
pub mod lockout;
pub mod machine;

pub use clock::{Clock, ManualClock, SystemClock};
pub use lockout::{Lockout, LockoutLedger, LockoutPolicy};
pub use machine::{UnlockAttempt, UnlockState, UnlockStateMachine};
