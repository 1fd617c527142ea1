#[cfg(test)]
mod tests {
    use crate::config::{ConfigError, TableConfig};

    #[test]
    fn test_defaults_validate() {
        TableConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_compaction_thresholds_forbidden() {
        let config = TableConfig {
            min_compaction_threshold: 0,
            ..TableConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = TableConfig {
            max_compaction_threshold: 0,
            ..TableConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_inverted_thresholds_forbidden() {
        let config = TableConfig {
            min_compaction_threshold: 8,
            max_compaction_threshold: 4,
            ..TableConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_crc_check_chance_range() {
        let config = TableConfig {
            crc_check_chance: 1.5,
            ..TableConfig::default()
        };
        assert!(config.validate().is_err());

        let config = TableConfig {
            crc_check_chance: 0.0,
            ..TableConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_flush_writers_forbidden() {
        let config = TableConfig {
            flush_writers: 0,
            ..TableConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_compaction_config_carries_thresholds() {
        let config = TableConfig {
            min_compaction_threshold: 3,
            max_compaction_threshold: 9,
            ..TableConfig::default()
        };
        let compaction = config.compaction_config();
        assert_eq!(compaction.min_threshold, 3);
        assert_eq!(compaction.max_threshold, 9);
    }
}
