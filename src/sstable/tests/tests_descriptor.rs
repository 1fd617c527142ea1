#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::TempDir;

    use crate::sstable::tests::helpers::build_file;
    use crate::sstable::{Component, Descriptor, SSTableFormat};

    #[test]
    fn test_filename_round_trip() {
        let descriptor = Descriptor::new("/data/ks/t-01", 42, SSTableFormat::Big);
        let name = descriptor.filename(Component::Data);
        assert_eq!(name, "big-na-42-Data.db");

        let path = Path::new("/data/ks/t-01").join(&name);
        let (parsed, component) = Descriptor::parse(&path).unwrap();
        assert_eq!(parsed, descriptor);
        assert_eq!(component, Component::Data);
    }

    #[test]
    fn test_toc_uses_txt_extension() {
        let descriptor = Descriptor::new("/d", 1, SSTableFormat::Indexed);
        assert_eq!(descriptor.filename(Component::Toc), "idx-da-1-TOC.txt");
    }

    #[test]
    fn test_parse_rejects_foreign_files() {
        assert!(Descriptor::parse(Path::new("/d/segment-00000001.log")).is_none());
        assert!(Descriptor::parse(Path::new("/d/manifest.json")).is_none());
        assert!(Descriptor::parse(Path::new("/d/big-xx-1-Data.db")).is_none());
        assert!(Descriptor::parse(Path::new("/d/big-na-notanum-Data.db")).is_none());
    }

    #[test]
    fn test_discover_finds_complete_sets_sorted_by_generation() {
        let tmp = TempDir::new().unwrap();
        build_file(tmp.path(), 7, 3);
        build_file(tmp.path(), 2, 3);

        let found = Descriptor::discover(tmp.path()).unwrap();
        let generations: Vec<u64> = found.iter().map(|d| d.generation).collect();
        assert_eq!(generations, vec![2, 7]);
        assert!(found.iter().all(Descriptor::is_complete));
    }

    #[test]
    fn test_delete_all_removes_components() {
        let tmp = TempDir::new().unwrap();
        let (reader, _) = build_file(tmp.path(), 1, 2);
        let descriptor = reader.descriptor().clone();
        assert!(descriptor.is_complete());

        descriptor.delete_all().unwrap();
        assert!(!descriptor.path(Component::Data).exists());
        assert!(!descriptor.path(Component::Toc).exists());

        // Idempotent.
        descriptor.delete_all().unwrap();
    }
}
