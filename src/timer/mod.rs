pub mod controller;
pub mod recovery;
pub mod state;

pub use controller::TimerController;
pub use recovery::{recover_drift, DriftOutcome};
pub use state::{AutoStart, Completion, TickOutcome, TimerSignal};
