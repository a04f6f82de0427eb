use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered field name -> value mapping used for payloads and selectors.
pub type Fields = Map<String, Value>;

/// A single document headed for the write sink.
///
/// `data` is the payload. `selector` picks the target documents for
/// update and delete operations and is ignored by inserts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub data: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Fields>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: Fields) -> Self {
        Self {
            data,
            selector: None,
        }
    }

    pub fn with_selector(mut self, selector: Fields) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.data.insert(name.into(), value);
    }

    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    pub fn selector(&self) -> Option<&Fields> {
        self.selector.as_ref()
    }
}

impl From<Fields> for Record {
    fn from(data: Fields) -> Self {
        Self::with_data(data)
    }
}
