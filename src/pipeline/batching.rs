//! Batch-size normalization and input partitioning.

/// An ordered, contiguous slice of a run's input processed as a unit
pub type Batch<T> = Vec<T>;

/// Normalize a configured batch size.
///
/// Non-positive values mean "one batch containing all elements" and map to
/// `None`.
pub fn normalize_batch_size(batch_size: i64) -> Option<usize> {
    if batch_size <= 0 {
        None
    } else {
        Some(usize::try_from(batch_size).unwrap_or(usize::MAX))
    }
}

/// Normalize a configured worker count, defaulting to one worker per stage.
///
/// The result is never below 1 so a pool can always make progress.
pub fn normalize_worker_count(worker_count: i64, stage_count: usize) -> usize {
    if worker_count <= 0 {
        stage_count.max(1)
    } else {
        usize::try_from(worker_count).unwrap_or(usize::MAX)
    }
}

/// Split `elements` into consecutive batches of at most `batch_size`.
///
/// Batches partition the input exactly: concatenating them yields the input
/// in its original order. Only the final batch may be short. An empty input
/// produces no batches.
pub fn partition<T>(elements: Vec<T>, batch_size: Option<usize>) -> Vec<Batch<T>> {
    if elements.is_empty() {
        return Vec::new();
    }

    let size = match batch_size {
        Some(size) if size < elements.len() => size,
        _ => return vec![elements],
    };

    let mut batches = Vec::with_capacity(elements.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for element in elements {
        current.push(element);
        if current.len() == size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
