//! Redundancy-priority collision resolution and eviction ordering
//!
//! Both functions here are pure: they take a snapshot of the catalog and
//! return what should change. The orchestrator applies the result, persists
//! bumped priorities and moves the boot pointer.

use std::collections::BinaryHeap;

use crate::version::VersionId;

/// Sort key given to failed activations so they are evicted first
pub const FAILED_EVICTION_PRIORITY: u16 = 999;

/// Result of resolving a priority request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityResolution {
    /// Versions whose priority must change, in walk order
    pub bumped: Vec<(VersionId, u8)>,
    /// Version the boot pointer should name
    pub boot_target: VersionId,
}

/// Resolve collisions caused by giving `requester` the priority `requested`
///
/// `holders` lists every version currently holding a priority. The
/// requester's own entry, if present, is replaced by the requested value.
/// The working set is sorted ascending by `(priority, id)` and walked with a
/// running free value starting at `requested`: every other entry whose
/// snapshot priority equals the free value is moved to `free + 1` and the
/// free value advances. Collisions that do not involve the running free
/// value are left alone.
pub fn resolve_collisions(
    requested: u8,
    requester: &VersionId,
    holders: &[(VersionId, u8)],
) -> PriorityResolution {
    let mut working: Vec<(VersionId, u8)> = Vec::with_capacity(holders.len() + 1);
    working.push((requester.clone(), requested));
    working.extend(
        holders
            .iter()
            .filter(|(id, _)| id != requester)
            .cloned(),
    );
    working.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let mut free = requested;
    let mut bumped = Vec::new();
    for (id, priority) in &working {
        if id == requester {
            continue;
        }
        if *priority == free {
            let next = free.saturating_add(1);
            if next == free {
                tracing::warn!(version_id = %id, "Priority cannot be bumped past {}", u8::MAX);
                continue;
            }
            free = next;
            bumped.push((id.clone(), free));
        }
    }

    let boot_target = match working.first() {
        Some((_, lowest)) if *lowest == requested => requester.clone(),
        Some((id, _)) => id.clone(),
        None => requester.clone(),
    };

    PriorityResolution {
        bumped,
        boot_target,
    }
}

/// Version the boot pointer should name after an erase
///
/// Lowest priority wins; on ties the last entry in catalog order wins.
pub fn lowest_priority<'a, I>(holders: I) -> Option<VersionId>
where
    I: IntoIterator<Item = (&'a VersionId, u8)>,
{
    let mut lowest: Option<(&VersionId, u8)> = None;
    for (id, priority) in holders {
        match lowest {
            Some((_, best)) if priority > best => {}
            _ => lowest = Some((id, priority)),
        }
    }
    lowest.map(|(id, _)| id.clone())
}

/// Candidate for eviction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    /// Version that may be evicted
    pub version_id: VersionId,
    /// Priority, or [`FAILED_EVICTION_PRIORITY`] for failed activations
    pub sort_priority: u16,
}

/// Decide which versions to evict to bring a class below its cap
///
/// `resident` is the number of same-purpose activations in Active or Failed
/// (protected ones included). Candidates are popped highest priority first
/// while the remaining count is still at or above `cap`.
pub fn eviction_order(
    candidates: Vec<EvictionCandidate>,
    resident: usize,
    cap: usize,
) -> Vec<VersionId> {
    let mut queue: BinaryHeap<(u16, VersionId)> = candidates
        .into_iter()
        .map(|c| (c.sort_priority, c.version_id))
        .collect();

    let mut count = resident;
    let mut evicted = Vec::new();
    while count >= cap {
        let Some((_, id)) = queue.pop() else {
            break;
        };
        evicted.push(id);
        count = count.saturating_sub(1);
    }
    evicted
}
