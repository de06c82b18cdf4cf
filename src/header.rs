// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! §4.2 header validation: the first frame of a file must be an `OSMHeader`
//! block whose `required_features` are all in the capability whitelist.

use protobuf::Message;

use crate::error::{Error, Result};
use crate::proto::osmformat::HeaderBlock;

/// Features this decoder knows how to handle. Anything else listed in a
/// file's `required_features` makes the file unreadable by this decoder.
const SUPPORTED_FEATURES: &[&str] = &["OsmSchema-V0.6", "DenseNodes"];

/// Parses `data` as a `HeaderBlock` and checks its `required_features`
/// against [SUPPORTED_FEATURES]. Optional features and bounding-box metadata
/// are ignored.
pub fn validate_header_block(data: &[u8]) -> Result<()> {
    let header = HeaderBlock::parse_from_bytes(data)?;

    let unsupported: Vec<String> = header
        .required_features
        .iter()
        .filter(|f| !SUPPORTED_FEATURES.contains(&f.as_str()))
        .cloned()
        .collect();

    if unsupported.is_empty() {
        Ok(())
    } else {
        Err(Error::UnsupportedFeatures(unsupported))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with_features(features: &[&str]) -> Vec<u8> {
        let mut header = HeaderBlock::new();
        header.required_features = features.iter().map(|f| f.to_string()).collect();
        header.write_to_bytes().unwrap()
    }

    #[test]
    fn accepts_known_features() {
        let data = header_with_features(&["OsmSchema-V0.6", "DenseNodes"]);
        assert!(validate_header_block(&data).is_ok());
    }

    #[test]
    fn accepts_no_required_features() {
        let data = header_with_features(&[]);
        assert!(validate_header_block(&data).is_ok());
    }

    #[test]
    fn rejects_unknown_feature_and_names_it() {
        let data = header_with_features(&["OsmSchema-V0.6", "HistoricalInformation"]);
        match validate_header_block(&data) {
            Err(Error::UnsupportedFeatures(missing)) => {
                assert_eq!(missing, vec!["HistoricalInformation".to_string()]);
            }
            other => panic!("expected UnsupportedFeatures, got {other:?}"),
        }
    }
}
