#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::data::filter::DataRange;
    use crate::sstable::Component;
    use crate::sstable::tests::helpers::build_file;

    #[test]
    fn test_fresh_reader_holds_self_reference() {
        let tmp = TempDir::new().unwrap();
        let (reader, _) = build_file(tmp.path(), 1, 5);
        assert_eq!(reader.ref_count(), 1);
        assert!(!reader.is_released());
    }

    #[test]
    fn test_obsolete_with_no_readers_deletes_files() {
        let tmp = TempDir::new().unwrap();
        let (reader, _) = build_file(tmp.path(), 1, 5);
        let descriptor = reader.descriptor().clone();

        reader.mark_obsolete();
        assert!(reader.is_released());
        assert!(!descriptor.path(Component::Data).exists());
        assert!(!descriptor.path(Component::Toc).exists());
    }

    #[test]
    fn test_active_scan_defers_deletion() {
        let tmp = TempDir::new().unwrap();
        let (reader, _) = build_file(tmp.path(), 1, 5);
        let descriptor = reader.descriptor().clone();

        let mut scanner = reader.scan(&DataRange::full()).unwrap();
        scanner.next().unwrap().unwrap();

        reader.mark_obsolete();
        // The scanner's reference keeps bytes alive.
        assert!(!reader.is_released());
        assert!(descriptor.path(Component::Data).exists());
        scanner.next().unwrap().unwrap();

        drop(scanner);
        assert!(reader.is_released());
        assert!(!descriptor.path(Component::Data).exists());
    }

    #[test]
    fn test_try_ref_fails_after_release() {
        let tmp = TempDir::new().unwrap();
        let (reader, _) = build_file(tmp.path(), 1, 5);

        reader.mark_obsolete();
        assert!(reader.try_ref().is_none());
    }

    #[test]
    fn test_await_released_returns_when_drained() {
        let tmp = TempDir::new().unwrap();
        let (reader, _) = build_file(tmp.path(), 1, 5);

        let guard = reader.try_ref().unwrap();
        reader.mark_obsolete();

        let waiter = {
            let reader = std::sync::Arc::clone(&reader);
            std::thread::spawn(move || reader.await_released(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(guard);
        waiter.join().unwrap();
        assert!(reader.is_released());
    }
}
