use crate::core::{Fields, Operation, Record, WriteError, WriteSink};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory document collection.
///
/// Cloning yields another handle on the same documents, so a caller can
/// keep one handle for inspection while the runner owns the other.
#[derive(Debug, Clone, Default)]
pub struct MemoryCollection {
    documents: Arc<Mutex<Vec<Fields>>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: Vec<Fields>) -> Self {
        Self {
            documents: Arc::new(Mutex::new(documents)),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|docs| docs.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn documents(&self) -> Vec<Fields> {
        self.lock().map(|docs| docs.clone()).unwrap_or_default()
    }

    pub fn count_matching(&self, selector: &Fields) -> usize {
        self.lock()
            .map(|docs| docs.iter().filter(|doc| matches(doc, selector)).count())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Fields>>, WriteError> {
        self.documents
            .lock()
            .map_err(|_| WriteError::fatal("collection lock poisoned"))
    }
}

fn matches(document: &Fields, selector: &Fields) -> bool {
    selector
        .iter()
        .all(|(key, value)| document.get(key) == Some(value))
}

/// Every record's selector, or a fatal error if any is missing. Checked
/// before anything is applied so a bad record rejects the whole batch.
fn selectors<'a>(operation: Operation, batch: &'a [Record]) -> Result<Vec<&'a Fields>, WriteError> {
    batch
        .iter()
        .enumerate()
        .map(|(i, record)| match record.selector() {
            Some(selector) if !selector.is_empty() => Ok(selector),
            _ => Err(WriteError::fatal(format!(
                "{operation} requires a non-empty selector (record {i} of batch)"
            ))),
        })
        .collect()
}

#[async_trait]
impl WriteSink for MemoryCollection {
    async fn write(&mut self, operation: Operation, batch: &[Record]) -> Result<(), WriteError> {
        let selectors = if operation.requires_selector() {
            selectors(operation, batch)?
        } else {
            Vec::new()
        };

        match operation {
            Operation::Insert => {
                self.lock()?
                    .extend(batch.iter().map(|record| record.data.clone()));
            }
            Operation::Update => {
                let mut docs = self.lock()?;
                for (record, selector) in batch.iter().zip(selectors) {
                    for doc in docs.iter_mut().filter(|doc| matches(doc, selector)) {
                        for (key, value) in &record.data {
                            doc.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
            Operation::Delete => {
                self.lock()?
                    .retain(|doc| !selectors.iter().any(|selector| matches(doc, selector)));
            }
        }
        Ok(())
    }
}
