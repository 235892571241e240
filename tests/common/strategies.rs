use proptest::prelude::*;

/// Input sequences, including the empty one
pub fn elements_strategy() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(any::<u32>(), 0..200)
}

/// Configured batch sizes, including the non-positive "single batch" sentinels
pub fn batch_size_strategy() -> impl Strategy<Value = i64> {
    prop_oneof![
        1 => Just(0i64),
        1 => -100i64..0,
        6 => 1i64..64,
    ]
}

/// Worker pool capacities worth exercising
pub fn capacity_strategy() -> impl Strategy<Value = usize> {
    1usize..=8
}
