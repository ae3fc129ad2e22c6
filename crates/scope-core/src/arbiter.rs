//! Single-owner arbitration of the shared camera, stage and illumination.
//!
//! Live view, autofocus, laser autofocus, acquisition and slide positioning all
//! drive the same hardware. Exactly one of them may own it at a time; a second
//! claimant gets [`ScopeError::ResourceBusy`] instead of racing the first.
//! Ownership is released when the returned [`ResourceGuard`] is dropped.

use crate::error::{ScopeError, ScopeResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Operations that can own the shared hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Live,
    Autofocus,
    LaserAutofocus,
    Acquisition,
    SlidePositioning,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Owner::Live => "live view",
            Owner::Autofocus => "autofocus",
            Owner::LaserAutofocus => "laser autofocus",
            Owner::Acquisition => "acquisition",
            Owner::SlidePositioning => "slide positioning",
        };
        write!(f, "{}", label)
    }
}

/// Cloneable handle to the ownership slot.
#[derive(Clone, Default)]
pub struct ResourceArbiter {
    slot: Arc<Mutex<Option<Owner>>>,
}

impl ResourceArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the hardware for `owner`, failing if anyone holds it.
    pub fn try_acquire(&self, owner: Owner) -> ScopeResult<ResourceGuard> {
        let mut slot = self.slot.lock();
        if let Some(held_by) = *slot {
            tracing::warn!(requested = %owner, held_by = %held_by, "Resource busy");
            return Err(ScopeError::ResourceBusy {
                requested: owner,
                held_by,
            });
        }
        *slot = Some(owner);
        tracing::debug!(owner = %owner, "Resource acquired");
        Ok(ResourceGuard {
            slot: Arc::clone(&self.slot),
            owner,
        })
    }

    /// Current owner, if any.
    pub fn holder(&self) -> Option<Owner> {
        *self.slot.lock()
    }

    pub fn is_free(&self) -> bool {
        self.holder().is_none()
    }
}

impl fmt::Debug for ResourceArbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceArbiter")
            .field("holder", &self.holder())
            .finish()
    }
}

/// Proof of ownership. Dropping it frees the slot.
#[derive(Debug)]
#[must_use = "dropping the guard releases the hardware immediately"]
pub struct ResourceGuard {
    slot: Arc<Mutex<Option<Owner>>>,
    owner: Owner,
}

impl ResourceGuard {
    pub fn owner(&self) -> Owner {
        self.owner
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if *slot == Some(self.owner) {
            *slot = None;
            tracing::debug!(owner = %self.owner, "Resource released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_owner_is_rejected() {
        let arbiter = ResourceArbiter::new();
        let guard = arbiter.try_acquire(Owner::Live).unwrap();
        assert_eq!(guard.owner(), Owner::Live);

        match arbiter.try_acquire(Owner::Acquisition) {
            Err(ScopeError::ResourceBusy { requested, held_by }) => {
                assert_eq!(requested, Owner::Acquisition);
                assert_eq!(held_by, Owner::Live);
            }
            other => panic!("expected ResourceBusy, got {other:?}"),
        }
    }

    #[test]
    fn drop_releases_slot() {
        let arbiter = ResourceArbiter::new();
        {
            let _guard = arbiter.try_acquire(Owner::Autofocus).unwrap();
            assert_eq!(arbiter.holder(), Some(Owner::Autofocus));
        }
        assert!(arbiter.is_free());
        let _guard = arbiter.try_acquire(Owner::SlidePositioning).unwrap();
    }

    #[test]
    fn clones_share_the_slot() {
        let arbiter = ResourceArbiter::new();
        let other = arbiter.clone();
        let _guard = arbiter.try_acquire(Owner::Acquisition).unwrap();
        assert_eq!(other.holder(), Some(Owner::Acquisition));
        assert!(other.try_acquire(Owner::Live).is_err());
    }
}
