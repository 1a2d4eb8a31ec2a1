//! Overflow strategies shared by bounded queues and hubs

/// What a bounded structure does when an offer finds it full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Strategy {
    /// Retry until there is room
    #[default]
    BackPressure,
    /// Discard the new value and report `false`
    Dropping,
    /// Discard the oldest value to make room
    Sliding,
}

impl Strategy {
    /// Check whether a full structure makes the offering transaction wait
    pub fn suspends(&self) -> bool {
        matches!(self, Strategy::BackPressure)
    }
}
