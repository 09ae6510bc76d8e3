/// Full-node orchestrator state machine.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FullNodeState {
    /// Created, head height of the trusted source not yet known.
    #[default]
    Initializing,

    /// Fetching blocks from the trusted source until the ledger reaches its head.
    CatchingUp,

    /// Caught up. New blocks arrive as pushes from the trusted source.
    Live,
}

impl FullNodeState {
    /// Check if a transition to the target state is valid.
    pub fn can_transition_to(&self, target: FullNodeState) -> bool {
        match self {
            FullNodeState::Initializing => {
                matches!(target, FullNodeState::CatchingUp | FullNodeState::Live)
            }
            FullNodeState::CatchingUp => matches!(target, FullNodeState::Live),
            FullNodeState::Live => matches!(target, FullNodeState::CatchingUp),
        }
    }
}
