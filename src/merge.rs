//! Base + override merging shared by device settings and auth profiles.
//!
//! Both record kinds live in maps keyed by device name where the reserved key
//! `default` supplies fallback values. A device record wins field by field:
//! fields it leaves unset are inherited from `default`, fields it sets replace
//! the default value without touching siblings.

use indexmap::IndexMap;

/// Reserved record name holding fallback values for every other entry.
pub const DEFAULT_KEY: &str = "default";

/// Field-local overlay of one sparse record on top of another.
pub trait Overlay: Clone {
    /// Returns `self` with every field set in `over` replaced by `over`'s value.
    fn overlay(&self, over: &Self) -> Self;
}

/// Picks the override value when set, otherwise the base value.
pub fn pick<T: Clone>(base: &Option<T>, over: &Option<T>) -> Option<T> {
    over.clone().or_else(|| base.clone())
}

/// Resolves `name` against `records`, merging with the `default` entry if present.
///
/// Returns `None` when `name` itself has no record.
pub fn resolve<T: Overlay>(records: &IndexMap<String, T>, name: &str) -> Option<T> {
    let record = records.get(name)?;
    match records.get(DEFAULT_KEY) {
        Some(base) if name != DEFAULT_KEY => Some(base.overlay(record)),
        _ => Some(record.clone()),
    }
}

/// Iterates the names of all non-default entries in declaration order.
pub fn member_names<T>(records: &IndexMap<String, T>) -> impl Iterator<Item = &str> {
    records
        .keys()
        .map(String::as_str)
        .filter(|name| *name != DEFAULT_KEY)
}
