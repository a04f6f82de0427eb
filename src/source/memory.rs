use crate::core::{Record, RecordSource, RecordStream, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;

/// Replayable source over records already held in memory.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    records: Arc<Vec<Record>>,
}

impl VecSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: Arc::new(records),
        }
    }
}

impl From<Vec<Record>> for VecSource {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}

#[async_trait]
impl RecordSource for VecSource {
    async fn count_records(&self) -> Result<usize> {
        Ok(self.records.len())
    }

    async fn read_from(&self, offset: usize) -> Result<RecordStream> {
        let records = Arc::clone(&self.records);
        let stream = futures::stream::iter(offset..records.len())
            .map(move |i| -> Result<Record> { Ok(records[i].clone()) });
        Ok(Box::pin(stream))
    }
}
