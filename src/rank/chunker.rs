//! Budgeted greedy partitioning of sized items.

use rand::seq::SliceRandom;
use rand::Rng;

/// Split `items` into ordered chunks whose cumulative cost stays within
/// `budget`.
///
/// Each chunk is the maximal greedy prefix of the remaining items. An item
/// whose own cost exceeds the budget becomes its own oversized chunk
/// rather than being dropped or looping forever. Partitioning is
/// deterministic for a fixed input order.
pub fn partition_by_budget<T, F>(items: Vec<T>, budget: usize, cost: F) -> Vec<Vec<T>>
where
    F: Fn(&T) -> usize,
{
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_cost = 0_usize;

    for item in items {
        let item_cost = cost(&item);
        if item_cost > budget {
            // Oversized: flush the open chunk, then isolate the item.
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_cost = 0;
            }
            chunks.push(vec![item]);
        } else if current_cost + item_cost > budget {
            chunks.push(std::mem::take(&mut current));
            current.push(item);
            current_cost = item_cost;
        } else {
            current.push(item);
            current_cost += item_cost;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Shuffle once, then partition.
///
/// The caller supplies the random source, so a seeded generator makes the
/// result fully deterministic.
pub fn partition_shuffled<T, F, R>(
    mut items: Vec<T>,
    budget: usize,
    cost: F,
    rng: &mut R,
) -> Vec<Vec<T>>
where
    F: Fn(&T) -> usize,
    R: Rng + ?Sized,
{
    items.shuffle(rng);
    partition_by_budget(items, budget, cost)
}
