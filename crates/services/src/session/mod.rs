pub(crate) mod phase;
mod service;

pub use phase::SessionEvent;
pub use service::{ProctoredSession, ProctoringService};
