//! Application layer - Call coordination
//!
//! This layer composes the domain ports into the call flow:
//! - Waiting for legs to reach a state
//! - Racing candidate legs
//! - Linking leg lifecycles
//! - Bridging the inbound leg with the winner
//! - Dispatching inbound calls into sessions

pub mod bridge_orchestrator;
pub mod call_session;
pub mod dispatcher;
pub mod hangup_linker;
pub mod race_dialer;
pub mod state_waiter;

pub use bridge_orchestrator::{BridgeOrchestrator, BridgeStage};
pub use call_session::{CallSession, SessionOutcome, SessionSettings};
pub use dispatcher::CallDispatcher;
pub use hangup_linker::{HangupLinker, LinkedGroup, MemberOutcome};
pub use race_dialer::{CandidateReport, CandidateResolution, RaceDialer, RaceOutcome, WinnerSlot};
pub use state_waiter::{StateWaiter, WaitResult};
