use csv::{ReaderBuilder, WriterBuilder};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::error::{Result, SprinklerError};
use crate::metrics_output::MetricOutput;

pub struct CsvOutput<W> {
    pub writer: W,
    /// Write a header row before the first record. Off when appending to a
    /// file that already has one.
    pub headers: bool,
}

impl<M, W> MetricOutput<M> for CsvOutput<W>
where
    W: Write + Send + 'static,
{
    type Error = SprinklerError;

    async fn export_metrics(self, metrics: impl Stream<Item = M>) -> Result<()>
    where
        M: Serialize + Send + 'static,
    {
        let (c_tx, c_rx) = flume::bounded(128);

        let writer_task = tokio::task::spawn_blocking(move || -> Result<()> {
            let mut writer = WriterBuilder::new()
                .has_headers(self.headers)
                .from_writer(self.writer);

            while let Ok(metric) = c_rx.recv() {
                writer.serialize(metric)?;
            }

            writer.flush()?;
            Ok(())
        });

        futures::pin_mut!(metrics);
        while let Some(metric) = metrics.next().await {
            // The writer only hangs up after failing; its error is reported below.
            if c_tx.send_async(metric).await.is_err() {
                break;
            }
        }
        drop(c_tx);

        writer_task.await?
    }
}

/// One entry of the water-level history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WaterLevelRecord {
    /// Controller-local seconds of the weather check.
    pub time: i64,
    pub water_percentage: u8,
}

pub async fn append_water_level(path: impl AsRef<Path>, record: WaterLevelRecord) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_ref())?;
    let is_new = file.metadata()?.len() == 0;

    let output = CsvOutput {
        writer: file,
        headers: is_new,
    };

    MetricOutput::<WaterLevelRecord>::export_metrics(output, futures::stream::iter([record])).await
}

pub fn read_water_level(path: impl AsRef<Path>) -> Result<Vec<WaterLevelRecord>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path.as_ref())?;

    reader
        .deserialize()
        .map(|record| record.map_err(SprinklerError::from))
        .collect()
}
