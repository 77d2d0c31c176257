use thiserror::Error;

#[derive(Debug, Error)]
pub enum SprinklerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("InfluxDB error: {0}")]
    Influx(#[from] influxdb::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("weather service returned status {status}")]
    WeatherStatus { status: u16 },
}

pub type Result<T> = std::result::Result<T, SprinklerError>;
