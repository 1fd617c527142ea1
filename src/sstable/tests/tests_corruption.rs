#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::{Read, Seek, SeekFrom, Write};

    use tempfile::TempDir;

    use crate::sstable::tests::helpers::build_file;
    use crate::sstable::{Component, SSTableError, SSTableReader};

    fn flip_byte(path: &std::path::Path, offset: u64) {
        let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
        file.seek(SeekFrom::Start(offset)).unwrap();
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).unwrap();
        byte[0] ^= 0xFF;
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.write_all(&byte).unwrap();
    }

    #[test]
    fn test_damaged_data_block_detected_on_read() {
        let tmp = TempDir::new().unwrap();
        let (reader, _) = build_file(tmp.path(), 1, 5);
        let descriptor = reader.descriptor().clone();
        drop(reader);

        // Flip a payload byte past the header.
        flip_byte(&descriptor.path(Component::Data), 40);

        let reader = SSTableReader::open(descriptor).unwrap();
        let damaged = reader
            .scan(&crate::data::filter::DataRange::full())
            .unwrap()
            .any(|item| {
                matches!(
                    item,
                    Err(SSTableError::ChecksumMismatch(_)) | Err(SSTableError::Encoding(_))
                )
            });
        assert!(damaged);
    }

    #[test]
    fn test_damaged_statistics_rejected_at_open() {
        let tmp = TempDir::new().unwrap();
        let (reader, _) = build_file(tmp.path(), 1, 5);
        let descriptor = reader.descriptor().clone();
        drop(reader);

        flip_byte(&descriptor.path(Component::Statistics), 20);

        let err = SSTableReader::open(descriptor).unwrap_err();
        assert!(matches!(
            err,
            SSTableError::ChecksumMismatch(_) | SSTableError::Corrupt(_)
        ));
    }

    #[test]
    fn test_missing_component_rejected_at_open() {
        let tmp = TempDir::new().unwrap();
        let (reader, _) = build_file(tmp.path(), 1, 5);
        let descriptor = reader.descriptor().clone();
        drop(reader);

        std::fs::remove_file(descriptor.path(Component::Filter)).unwrap();
        assert!(SSTableReader::open(descriptor).is_err());
    }

    #[test]
    fn test_truncated_toc_rejected_at_open() {
        let tmp = TempDir::new().unwrap();
        let (reader, _) = build_file(tmp.path(), 1, 5);
        let descriptor = reader.descriptor().clone();
        drop(reader);

        std::fs::write(descriptor.path(Component::Toc), "Data\nIndex\n").unwrap();
        let err = SSTableReader::open(descriptor).unwrap_err();
        assert!(matches!(err, SSTableError::Corrupt(_)));
    }
}
