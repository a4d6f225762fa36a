use jobrelay_core::JobId;

/// Value a re-execution driver compares across cycles to decide whether a
/// getter must run again.
///
/// `Volatile` tokens never repeat for the same getter, so the driver keeps
/// re-running it. `Stable` is returned once the bound job can no longer
/// change, and is the same value on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeToken {
    Volatile(u64),
    Stable(JobId),
}

impl ChangeToken {
    pub fn is_stable(&self) -> bool {
        matches!(self, ChangeToken::Stable(_))
    }
}
