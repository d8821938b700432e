//! Fixed-size batching of resolved addresses.
//!
//! Batch `k` always holds addresses `[k*size, (k+1)*size)` of the resolved
//! order; no reordering, no randomization. Batches are immutable once
//! formed. The size cap exists to respect the downstream vendor's rate
//! limit and to keep the BCC list bounded.

use std::num::NonZeroUsize;

/// Split `addresses` into ordered groups of at most `batch_size`.
/// The last group may be short; empty input yields no groups. Total with
/// no failure modes: the non-zero size is carried in the type.
pub fn chunk(addresses: Vec<String>, batch_size: NonZeroUsize) -> Vec<Vec<String>> {
    let size = batch_size.get();
    let mut batches = Vec::with_capacity(addresses.len().div_ceil(size));
    let mut current = Vec::with_capacity(size.min(addresses.len()));
    for address in addresses {
        current.push(address);
        if current.len() == size {
            batches.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
