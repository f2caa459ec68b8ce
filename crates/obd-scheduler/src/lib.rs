//! OBD-II Poller for Mode 01 PIDs
//!
//! Keeps the ordered set of PIDs to sample and drives the time-bounded
//! loop that exchanges one request per PID per sweep.

mod poller;
mod registry;

pub use poller::{DeadlineCheck, PidPoller, PollSummary, PollerConfig, PollerState, SignalOutcome};
pub use registry::{PollRegistry, RegistryChange};
