// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::HashMap;

/// Returns the union of `a` and `b`; keys present in both take `b`'s value.
pub fn merge_map(
    a: &HashMap<String, String>,
    b: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = a.clone();
    for (key, val) in b {
        merged.insert(key.clone(), val.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_map() {
        assert_eq!(merge_map(&map(&[]), &map(&[])), map(&[]));
        assert_eq!(
            merge_map(&map(&[("k1", "v1")]), &map(&[])),
            map(&[("k1", "v1")])
        );
        assert_eq!(
            merge_map(&map(&[("k1", "v1")]), &map(&[("k2", "v2")])),
            map(&[("k1", "v1"), ("k2", "v2")])
        );
        // the second map wins on collision
        assert_eq!(
            merge_map(&map(&[("k1", "v1")]), &map(&[("k1", "v2")])),
            map(&[("k1", "v2")])
        );
    }
}
