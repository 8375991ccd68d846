//! Fixed-size, order-preserving partitioning of accepted records

use crate::models::{AcceptedRecord, Batch};

/// Split `records` into batches of at most `batch_size`, keeping input order
/// within each batch. Only the last batch may be shorter. A `batch_size` of
/// zero is treated as one.
pub fn partition(records: Vec<AcceptedRecord>, batch_size: usize) -> Vec<Batch> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(records.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size.min(records.len()));

    for record in records {
        current.push(record);
        if current.len() == batch_size {
            batches.push(Batch {
                index: batches.len(),
                records: std::mem::replace(&mut current, Vec::with_capacity(batch_size)),
            });
        }
    }

    if !current.is_empty() {
        batches.push(Batch {
            index: batches.len(),
            records: current,
        });
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordFlags;
    use chrono::Utc;
    use proptest::prelude::*;
    use rstest::rstest;
    use std::sync::Arc;

    fn records(count: usize) -> Vec<AcceptedRecord> {
        let credential: Arc<str> = "digest.salt".into();
        let balance: Arc<str> = "{}".into();
        (0..count)
            .map(|i| AcceptedRecord {
                unique_key: format!("{:010}", i),
                username: format!("user_{}", i),
                full_name: format!("user_{}", i),
                email: format!("{:010}@example.com", i),
                flags: RecordFlags::default(),
                secondary_code: format!("CODE{:04}", i),
                created_at: Utc::now(),
                credential: Arc::clone(&credential),
                balance: Arc::clone(&balance),
            })
            .collect()
    }

    #[rstest]
    #[case(0, 50, vec![])]
    #[case(5, 2, vec![2, 2, 1])]
    #[case(4, 2, vec![2, 2])]
    #[case(3, 50, vec![3])]
    #[case(101, 50, vec![50, 50, 1])]
    #[case(3, 0, vec![1, 1, 1])]
    fn test_batch_sizes(#[case] count: usize, #[case] size: usize, #[case] expected: Vec<usize>) {
        let sizes: Vec<usize> = partition(records(count), size)
            .iter()
            .map(Batch::len)
            .collect();
        assert_eq!(sizes, expected);
    }

    #[test]
    fn test_indices_are_sequential() {
        let batches = partition(records(7), 3);
        let indices: Vec<usize> = batches.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    proptest! {
        #[test]
        fn partition_preserves_order_and_bounds(count in 0usize..300, size in 1usize..64) {
            let input = records(count);
            let expected_keys: Vec<String> = input.iter().map(|r| r.unique_key.clone()).collect();

            let batches = partition(input, size);
            prop_assert_eq!(batches.len(), count.div_ceil(size));
            for (i, batch) in batches.iter().enumerate() {
                prop_assert_eq!(batch.index, i);
                prop_assert!(!batch.is_empty());
                prop_assert!(batch.len() <= size);
                if i + 1 < batches.len() {
                    prop_assert_eq!(batch.len(), size);
                }
            }

            let flattened: Vec<String> = batches
                .into_iter()
                .flat_map(|b| b.records)
                .map(|r| r.unique_key)
                .collect();
            prop_assert_eq!(flattened, expected_keys);
        }
    }
}
