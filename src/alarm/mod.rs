mod engine;
mod service;

pub use engine::{AlarmEngine, AlarmEvent, AlarmStatus, EventKind};
pub use service::{AlarmStatusView, EvaluatorService};
