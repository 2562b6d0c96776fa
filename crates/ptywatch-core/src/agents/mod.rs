mod types;

pub use types::{
    AgentState, Session, SessionState, Verdict, CLASSIFIER_UNAVAILABLE, GENERIC_AGENT,
};
