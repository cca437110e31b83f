//! Connection lifecycle policies
//!
//! Captures carry no explicit "connection closed" event, so closing is left
//! to the caller. A closed flow keeps its data, but its tuple no longer maps
//! to it: the next packet on that tuple starts a fresh connection.

use std::fmt::Debug;

/// What has been observed on a flow so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowState {
    pub forward_fin: bool,
    pub reverse_fin: bool,
    pub reset: bool,
    pub packets: u64,
}

/// Decides when a flow is logically closed
pub trait ClosePolicy: Send + Sync + Debug {
    fn should_close(&self, state: &FlowState) -> bool;
}

/// Keep every flow open until [`finish`](super::StreamReassembler::finish)
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverClose;

impl ClosePolicy for NeverClose {
    fn should_close(&self, _state: &FlowState) -> bool {
        false
    }
}

/// Close on RST, or once both directions have sent FIN
#[derive(Debug, Clone, Copy, Default)]
pub struct FinOrRst;

impl ClosePolicy for FinOrRst {
    fn should_close(&self, state: &FlowState) -> bool {
        state.reset || (state.forward_fin && state.reverse_fin)
    }
}
