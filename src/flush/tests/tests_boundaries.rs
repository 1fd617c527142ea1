#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::data::{HashPartitioner, OrderPreservingPartitioner, Token};
    use crate::flush::DiskBoundaryManager;

    fn dirs(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("/data/disk{i}"))).collect()
    }

    #[test]
    fn test_single_directory_is_one_full_shard() {
        let manager = DiskBoundaryManager::new(Arc::new(HashPartitioner), dirs(1));
        let shards = manager.boundaries().shard_ranges();
        assert_eq!(shards.len(), 1);
        assert!(shards[0].1.contains_token(Token::MIN));
        assert!(shards[0].1.contains_token(Token::MAX));
    }

    #[test]
    fn test_every_token_lands_in_exactly_one_shard() {
        let manager = DiskBoundaryManager::new(Arc::new(HashPartitioner), dirs(4));
        let shards = manager.boundaries().shard_ranges();
        assert_eq!(shards.len(), 4);

        for token in [
            Token::MIN,
            Token(-1_000_000),
            Token(-1),
            Token(0),
            Token(1),
            Token(7_777_777_777),
            Token::MAX,
        ] {
            let owners = shards
                .iter()
                .filter(|(_, range)| range.contains_token(token))
                .count();
            assert_eq!(owners, 1, "token {token} owned by {owners} shards");
        }
    }

    #[test]
    fn test_directory_for_matches_shard_ranges() {
        let manager = DiskBoundaryManager::new(Arc::new(HashPartitioner), dirs(3));
        let boundaries = manager.boundaries();
        for token in [Token::MIN, Token(-5), Token(0), Token(5), Token::MAX] {
            let owner = boundaries.directory_for(token).clone();
            let by_range = boundaries
                .shard_ranges()
                .into_iter()
                .find(|(_, range)| range.contains_token(token))
                .map(|(dir, _)| dir)
                .unwrap();
            assert_eq!(owner, by_range);
        }
    }

    #[test]
    fn test_unsplittable_partitioner_collapses_to_one_shard() {
        let manager = DiskBoundaryManager::new(Arc::new(OrderPreservingPartitioner), dirs(4));
        assert_eq!(manager.boundaries().shard_ranges().len(), 1);
    }

    #[test]
    fn test_invalidate_bumps_version() {
        let manager = DiskBoundaryManager::new(Arc::new(HashPartitioner), dirs(2));
        let before = manager.boundaries().version;
        manager.invalidate();
        let after = manager.boundaries().version;
        assert!(after > before);
    }
}
