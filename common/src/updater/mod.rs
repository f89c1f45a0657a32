// Periodic lifecycle updater
//
// Decides, per entity type, which entities are due for a regular-update
// event, which have exhausted all retention leases and must be deleted, and
// dispatches the resulting work onto the task queue under a rate budget.

pub mod clock;
pub mod dispatch;
pub mod engine;
pub mod lifecycle;

pub use clock::{Clock, SystemClock};
pub use dispatch::{DispatchOutcome, RateLimitedDispatcher};
pub use engine::{CycleSummary, UpdaterConfig, UpdaterEngine};
