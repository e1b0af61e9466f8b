//! Numeric instance id allocation

use std::collections::HashSet;
use std::sync::Arc;

use rand::Rng;
use tracing::warn;

use crate::errors::PlatformError;
use crate::proxmox::ClusterInventory;
use crate::store::DeploymentStore;

/// Lowest allocatable instance id (Proxmox reserves ids below 100)
pub const VM_ID_MIN: u32 = 100;

/// Highest allocatable instance id
pub const VM_ID_MAX: u32 = 999;

/// Random picks before falling back to a linear scan
const RANDOM_ATTEMPTS: u32 = 100;

/// Pick an id in [VM_ID_MIN, VM_ID_MAX] not present in `used`.
///
/// The linear scan guarantees an id is found whenever one is free.
pub fn pick_unused_id(
    used: &HashSet<u32>,
    rng: &mut impl Rng,
) -> Result<u32, PlatformError> {
    for _ in 0..RANDOM_ATTEMPTS {
        let candidate = rng.gen_range(VM_ID_MIN..=VM_ID_MAX);
        if !used.contains(&candidate) {
            return Ok(candidate);
        }
    }

    for candidate in VM_ID_MIN..=VM_ID_MAX {
        if !used.contains(&candidate) {
            return Ok(candidate);
        }
    }

    Err(PlatformError::AllocationExhausted)
}

/// Allocates instance ids against both local records and the cluster.
///
/// The caller is responsible for serializing allocate-and-persist; two
/// concurrent allocations can otherwise pick the same id.
pub struct IdAllocator {
    store: Arc<dyn DeploymentStore>,
    inventory: Arc<dyn ClusterInventory>,
}

impl IdAllocator {
    pub fn new(store: Arc<dyn DeploymentStore>, inventory: Arc<dyn ClusterInventory>) -> Self {
        Self { store, inventory }
    }

    /// Pick an id unused by any non-deleted record or cluster instance.
    ///
    /// An unreachable cluster degrades to local records only, with a
    /// warning.
    pub async fn allocate(&self) -> Result<u32, PlatformError> {
        let mut used = self.store.used_vm_ids().await?;

        match self.inventory.used_vm_ids().await {
            Ok(remote) => used.extend(remote),
            Err(err) => {
                warn!(
                    "cluster inventory unavailable, allocating from local records only: {}",
                    err
                );
            }
        }

        pick_unused_id(&used, &mut rand::thread_rng())
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn picked_id_is_in_range_and_unused() {
        let mut rng = StdRng::seed_from_u64(7);
        let used: HashSet<u32> = (100..=999).step_by(2).collect();

        for _ in 0..200 {
            let id = pick_unused_id(&used, &mut rng).unwrap();
            assert!((VM_ID_MIN..=VM_ID_MAX).contains(&id));
            assert!(!used.contains(&id));
        }
    }

    #[test]
    fn linear_scan_finds_the_last_free_id() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut used: HashSet<u32> = (VM_ID_MIN..=VM_ID_MAX).collect();
        used.remove(&137);

        let id = pick_unused_id(&used, &mut rng).unwrap();
        assert_eq!(id, 137);
    }

    #[test]
    fn full_range_is_exhausted() {
        let mut rng = StdRng::seed_from_u64(7);
        let used: HashSet<u32> = (VM_ID_MIN..=VM_ID_MAX).collect();

        match pick_unused_id(&used, &mut rng) {
            Err(PlatformError::AllocationExhausted) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
