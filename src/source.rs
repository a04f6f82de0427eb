pub mod file;
pub mod memory;

use crate::core::{Fields, Record};

/// Copies `keys` from the payload into the record's selector.
pub(crate) fn attach_selector(mut record: Record, keys: &[String]) -> Record {
    if keys.is_empty() {
        return record;
    }
    let selector: Fields = keys
        .iter()
        .filter_map(|key| record.data.get(key).map(|v| (key.clone(), v.clone())))
        .collect();
    record.selector = Some(selector);
    record
}
