//! Session Description Store
//!
//! Holds the local and remote description of one session. Each slot only
//! accepts a description whose sequence is strictly newer than the one it
//! holds, so a superseded description can never overwrite a current one.

use tracing::debug;

use crate::errors::{NegotiationError, Result};
use crate::types::{Description, DescriptionSlot};

/// Local/remote description slots of a single session
#[derive(Debug, Clone, Default)]
pub struct DescriptionStore {
    local: Option<Description>,
    remote: Option<Description>,
}

impl DescriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the local slot
    pub fn set_local(&mut self, desc: Description) -> Result<()> {
        Self::write_slot(&mut self.local, DescriptionSlot::Local, desc)?;
        Ok(())
    }

    /// Write the remote slot.
    ///
    /// Returns `true` when this is the first remote description the session
    /// has ever accepted, which is the trigger for draining the candidate queue.
    pub fn set_remote(&mut self, desc: Description) -> Result<bool> {
        let first = self.remote.is_none();
        Self::write_slot(&mut self.remote, DescriptionSlot::Remote, desc)?;
        Ok(first)
    }

    pub fn local(&self) -> Option<&Description> {
        self.local.as_ref()
    }

    pub fn remote(&self) -> Option<&Description> {
        self.remote.as_ref()
    }

    /// Sequence of the current slot value, 0 when empty
    pub fn sequence(&self, slot: DescriptionSlot) -> u64 {
        let current = match slot {
            DescriptionSlot::Local => &self.local,
            DescriptionSlot::Remote => &self.remote,
        };
        current.as_ref().map(|d| d.sequence).unwrap_or(0)
    }

    /// Reject `desc` if it is not newer than what `slot` holds
    pub fn check_fresh(&self, slot: DescriptionSlot, desc: &Description) -> Result<()> {
        let current = match slot {
            DescriptionSlot::Local => &self.local,
            DescriptionSlot::Remote => &self.remote,
        };
        Self::freshness(current, slot, desc)
    }

    fn freshness(current: &Option<Description>, slot: DescriptionSlot, desc: &Description) -> Result<()> {
        match current {
            Some(existing) if desc.sequence <= existing.sequence => {
                Err(NegotiationError::StaleDescription {
                    slot,
                    current: existing.sequence,
                    received: desc.sequence,
                })
            }
            _ => Ok(()),
        }
    }

    fn write_slot(current: &mut Option<Description>, slot: DescriptionSlot, desc: Description) -> Result<()> {
        Self::freshness(current, slot, &desc)?;
        debug!("Stored {} {} description (seq {})", slot, desc.kind, desc.sequence);
        *current = Some(desc);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_remote_is_rejected_and_slot_retained() {
        let mut store = DescriptionStore::new();
        assert!(store.set_remote(Description::offer("v=0", 5)).unwrap());

        let err = store.set_remote(Description::offer("v=0 old", 3)).unwrap_err();
        assert!(matches!(
            err,
            NegotiationError::StaleDescription {
                slot: DescriptionSlot::Remote,
                current: 5,
                received: 3,
            }
        ));
        assert_eq!(store.remote().unwrap().sequence, 5);
        assert_eq!(store.remote().unwrap().payload, "v=0");
    }

    #[test]
    fn equal_sequence_is_stale() {
        let mut store = DescriptionStore::new();
        store.set_local(Description::offer("a", 1)).unwrap();
        assert!(store.set_local(Description::offer("b", 1)).is_err());
        assert_eq!(store.local().unwrap().payload, "a");
    }

    #[test]
    fn only_first_remote_write_reports_first() {
        let mut store = DescriptionStore::new();
        assert!(store.set_remote(Description::offer("a", 1)).unwrap());
        assert!(!store.set_remote(Description::offer("b", 2)).unwrap());
        // A rejected write never counts as first
        let mut fresh = DescriptionStore::new();
        fresh.set_remote(Description::answer("x", 4)).unwrap();
        assert!(fresh.set_remote(Description::answer("y", 2)).is_err());
        assert_eq!(fresh.sequence(DescriptionSlot::Remote), 4);
    }

    #[test]
    fn slots_are_independent() {
        let mut store = DescriptionStore::new();
        store.set_local(Description::offer("local", 7)).unwrap();
        store.set_remote(Description::answer("remote", 1)).unwrap();
        assert_eq!(store.sequence(DescriptionSlot::Local), 7);
        assert_eq!(store.sequence(DescriptionSlot::Remote), 1);
    }
}
