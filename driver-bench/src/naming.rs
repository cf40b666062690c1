use crate::case::StorageMode;

/// Report label for one matrix cell: backend id, storage suffix, then
/// `1e<exponent>`, e.g. `sqlite3OnDisk1e4`.
///
/// Labels are only ever displayed, never parsed back.
pub fn variant_name(mode: StorageMode, backend_id: &str, scale_exponent: u32) -> String {
    format!("{backend_id}{}1e{scale_exponent}", mode.suffix())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::SCALE_EXPONENTS;
    use std::collections::HashSet;

    #[test]
    fn label_format() {
        assert_eq!(
            variant_name(StorageMode::InMemory, "refA", 2),
            "refAInMemory1e2"
        );
        assert_eq!(
            variant_name(StorageMode::OnDisk, "sqlite3", 6),
            "sqlite3OnDisk1e6"
        );
    }

    #[test]
    fn labels_are_unique_over_the_default_matrix() {
        let mut seen = HashSet::new();
        for mode in StorageMode::ALL {
            for backend in ["sqlite3", "turso"] {
                for e in SCALE_EXPONENTS {
                    assert!(seen.insert(variant_name(mode, backend, e)));
                }
            }
        }
        assert_eq!(seen.len(), 2 * 2 * SCALE_EXPONENTS.len());
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(
            variant_name(StorageMode::OnDisk, "turso", 3),
            variant_name(StorageMode::OnDisk, "turso", 3)
        );
    }
}
