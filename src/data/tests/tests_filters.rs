#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::data::clustering::Clustering;
    use crate::data::filter::{ClusteringFilter, ColumnFilter, DataRange, TokenBound};
    use crate::data::Token;

    fn row(c: &[u8]) -> Clustering {
        Clustering::row(vec![c.to_vec()])
    }

    #[test]
    fn test_full_range_contains_all_tokens() {
        let range = DataRange::full();
        assert!(range.contains_token(Token::MIN));
        assert!(range.contains_token(Token(0)));
        assert!(range.contains_token(Token::MAX));
    }

    #[test]
    fn test_half_open_range() {
        let range = DataRange::half_open(Token(10), Token(20));
        assert!(!range.contains_token(Token(9)));
        assert!(range.contains_token(Token(10)));
        assert!(range.contains_token(Token(19)));
        assert!(!range.contains_token(Token(20)));
    }

    #[test]
    fn test_intersects_prunes_disjoint_files() {
        let range = DataRange {
            start: TokenBound::Exclusive(Token(100)),
            end: TokenBound::Inclusive(Token(200)),
        };

        assert!(!range.intersects(Token(0), Token(100)));
        assert!(range.intersects(Token(0), Token(101)));
        assert!(range.intersects(Token(150), Token(500)));
        assert!(range.intersects(Token(200), Token(500)));
        assert!(!range.intersects(Token(201), Token(500)));
    }

    #[test]
    fn test_slice_filter_selects_between_bounds() {
        let filter = ClusteringFilter::slice(
            Clustering::incl_start(vec![b"b".to_vec()]),
            Clustering::excl_end(vec![b"d".to_vec()]),
        );

        assert!(!filter.selects(&row(b"a")));
        assert!(filter.selects(&row(b"b")));
        assert!(filter.selects(&row(b"c")));
        assert!(!filter.selects(&row(b"d")));
        // Static rows pass; their visibility is a column concern.
        assert!(filter.selects(&Clustering::static_row()));
    }

    #[test]
    fn test_names_filter_bounds_selected_count() {
        let names: BTreeSet<Clustering> = [row(b"a"), row(b"c")].into_iter().collect();
        let filter = ClusteringFilter::Names(names);

        assert!(filter.selects(&row(b"a")));
        assert!(!filter.selects(&row(b"b")));
        assert_eq!(filter.selected_count(), Some(2));
        assert_eq!(ClusteringFilter::All.selected_count(), None);
    }

    #[test]
    fn test_column_filter() {
        let filter = ColumnFilter::Columns([1u32, 3].into_iter().collect());
        assert!(filter.selects(1));
        assert!(!filter.selects(2));
        assert!(ColumnFilter::All.selects(42));
    }
}
