use std::time::Duration;

use crate::error::SprinklerError;
use crate::weather_input::{WeatherInput, WeatherRequest};

pub struct HttpWeatherInput {
    client: reqwest::Client,
}

impl HttpWeatherInput {
    pub fn new(timeout: Duration) -> Result<Self, SprinklerError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client })
    }
}

impl WeatherInput for HttpWeatherInput {
    type Error = SprinklerError;

    async fn fetch(&self, request: &WeatherRequest) -> Result<String, Self::Error> {
        let response = self.client.get(request.url()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SprinklerError::WeatherStatus {
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }
}
