use crate::feature::Feature;
use std::collections::HashSet;

/// Stable sort by an optional key. Features without a key come first.
pub fn sort_by_key<K, F>(mut features: Vec<Feature>, key: F) -> Vec<Feature>
where
    K: Ord,
    F: Fn(&Feature) -> Option<K>,
{
    // Option orders None before any Some
    features.sort_by_key(|f| key(f));
    features
}

pub fn sort_by_start_date(features: Vec<Feature>) -> Vec<Feature> {
    sort_by_key(features, |f| f.start_date.clone())
}

/// Drop repeated ids, keeping the first occurrence in input order.
pub fn dedup_by_id(features: Vec<Feature>) -> Vec<Feature> {
    let mut seen = HashSet::new();
    features
        .into_iter()
        .filter(|f| seen.insert(f.id.clone()))
        .collect()
}
