pub mod csv_output;
pub mod influx_output;

use futures::Stream;
use serde::Serialize;
use std::error::Error;

/// A sink for telemetry records, consuming a whole stream of them.
pub trait MetricOutput<M> {
    type Error: Error + Sync + Send;

    /// Writes every record of `metrics`, returning once the sink has flushed.
    async fn export_metrics(self, metrics: impl Stream<Item = M>) -> Result<(), Self::Error>
    where
        M: Serialize + Send + 'static;
}
