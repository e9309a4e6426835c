//! Permission and capability gate
//!
//! Every adapter operation that touches hardware consults the gate first and
//! quietly skips the work when the relevant capability is missing.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Capabilities
// ----------------------------------------------------------------------------

/// Logical capability classes guarded by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Bonded enumeration, listening, dialing, sending
    Connect,
    /// Discovery start/stop
    Scan,
}

/// Whether the host grants capabilities at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTier {
    /// Capabilities are implied by installation; every check passes
    #[default]
    Legacy,
    /// Capabilities must be granted explicitly
    RuntimeGranted,
}

// ----------------------------------------------------------------------------
// Permission Gate
// ----------------------------------------------------------------------------

/// Policy check consulted before adapter operations
pub trait PermissionGate: Send + Sync {
    /// May connect-class operations run?
    fn can_connect(&self) -> bool;

    /// May scan-class operations run?
    fn can_scan(&self) -> bool;

    fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::Connect => self.can_connect(),
            Capability::Scan => self.can_scan(),
        }
    }
}

/// Gate backed by a tier and a mutable set of granted capabilities
#[derive(Debug, Default)]
pub struct RuntimePermissions {
    tier: CapabilityTier,
    granted: RwLock<HashSet<Capability>>,
}

impl RuntimePermissions {
    pub fn new(tier: CapabilityTier) -> Self {
        Self {
            tier,
            granted: RwLock::new(HashSet::new()),
        }
    }

    /// Gate for hosts without runtime-granted trust
    pub fn legacy() -> Self {
        Self::new(CapabilityTier::Legacy)
    }

    /// Runtime tier with the given capabilities already granted
    pub fn granted(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        let permissions = Self::new(CapabilityTier::RuntimeGranted);
        for capability in capabilities {
            permissions.grant(capability);
        }
        permissions
    }

    pub fn tier(&self) -> CapabilityTier {
        self.tier
    }

    pub fn grant(&self, capability: Capability) {
        self.granted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(capability);
    }

    pub fn revoke(&self, capability: Capability) {
        self.granted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&capability);
    }

    fn check(&self, capability: Capability) -> bool {
        match self.tier {
            CapabilityTier::Legacy => true,
            CapabilityTier::RuntimeGranted => self
                .granted
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&capability),
        }
    }
}

impl PermissionGate for RuntimePermissions {
    fn can_connect(&self) -> bool {
        self.check(Capability::Connect)
    }

    fn can_scan(&self) -> bool {
        self.check(Capability::Scan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_tier_always_allows() {
        let permissions = RuntimePermissions::legacy();
        assert!(permissions.can_connect());
        assert!(permissions.can_scan());

        permissions.revoke(Capability::Connect);
        assert!(permissions.can_connect());
    }

    #[test]
    fn test_runtime_tier_checks_grants() {
        let permissions = RuntimePermissions::new(CapabilityTier::RuntimeGranted);
        assert!(!permissions.can_connect());
        assert!(!permissions.can_scan());

        permissions.grant(Capability::Scan);
        assert!(permissions.can_scan());
        assert!(!permissions.allows(Capability::Connect));

        permissions.grant(Capability::Connect);
        permissions.revoke(Capability::Scan);
        assert!(permissions.can_connect());
        assert!(!permissions.can_scan());
    }

    #[test]
    fn test_granted_constructor() {
        let permissions = RuntimePermissions::granted([Capability::Connect]);
        assert_eq!(permissions.tier(), CapabilityTier::RuntimeGranted);
        assert!(permissions.can_connect());
        assert!(!permissions.can_scan());
    }
}
