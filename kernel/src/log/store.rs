// Version Log Storage Abstraction
//
// Defines the contract for the version chain log: an append-only
// record of every committed root, in commit order.

use super::VersionLogError;
use crate::version::{Version, GENESIS};

/// Storage for the version chain log.
///
/// Properties required from implementations:
/// - Append-only
/// - Ordered (commit order)
/// - Durable once `append` returns
///
/// Implementations MUST NOT:
/// - Reorder versions
/// - Mutate or drop existing versions
/// - Store the genesis root explicitly
pub trait VersionStore {
    /// Append a committed version.
    fn append(&mut self, version: &Version) -> Result<(), VersionLogError>;

    /// Load all versions in commit order (oldest first).
    fn load_in_order(&self) -> Result<Vec<Version>, VersionLogError>;

    /// Load all versions, most recent first.
    ///
    /// An empty history yields `[GENESIS]` so readers always have a
    /// version to open.
    fn load_all(&self) -> Result<Vec<Version>, VersionLogError> {
        let mut versions = self.load_in_order()?;
        if versions.is_empty() {
            versions.push(GENESIS);
        } else {
            versions.reverse();
        }
        Ok(versions)
    }
}
