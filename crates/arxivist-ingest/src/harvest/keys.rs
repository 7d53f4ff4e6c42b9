//! Storage keys derived from record identities

/// Object keys for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub metadata: String,
    pub artifact: String,
}

impl StorageKeys {
    /// Keys are a pure function of the identity, so re-harvesting a record
    /// always addresses the same objects.
    ///
    /// With `partition` set, the `YYMM` part of the identifier is inserted
    /// after the content-type prefix.
    pub fn for_identity(identity: &str, partition: bool) -> Self {
        let stem = match partition.then(|| partition_of(identity)).flatten() {
            Some(yymm) => format!("{}/{}", yymm, identity),
            None => identity.to_string(),
        };

        Self {
            metadata: format!("metadata/{}.json", stem),
            artifact: format!("pdf/{}.pdf", stem),
        }
    }
}

/// `YYMM` of `2101.00001` or `hep-th/9901001`.
fn partition_of(identity: &str) -> Option<&str> {
    let number = identity.rsplit('/').next()?;
    let yymm = number.get(..4)?;
    yymm.bytes().all(|b| b.is_ascii_digit()).then_some(yymm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_keys() {
        let keys = StorageKeys::for_identity("2101.00001", false);
        assert_eq!(keys.metadata, "metadata/2101.00001.json");
        assert_eq!(keys.artifact, "pdf/2101.00001.pdf");
    }

    #[test]
    fn test_partitioned_keys() {
        let keys = StorageKeys::for_identity("2101.00001", true);
        assert_eq!(keys.artifact, "pdf/2101/2101.00001.pdf");

        let old = StorageKeys::for_identity("hep-th/9901001", true);
        assert_eq!(old.metadata, "metadata/9901/hep-th/9901001.json");
    }

    #[test]
    fn test_unpartitionable_identity_stays_flat() {
        let keys = StorageKeys::for_identity("cs/abc", true);
        assert_eq!(keys.artifact, "pdf/cs/abc.pdf");
    }

    #[test]
    fn test_keys_are_deterministic() {
        assert_eq!(
            StorageKeys::for_identity("2101.00002", true),
            StorageKeys::for_identity("2101.00002", true)
        );
    }
}
