use std::io::Write;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::IngestError;

/// Upstream dump host.
pub trait PageviewSource: Send + Sync {
    /// Streams the body at `url` into `destination`; non-2xx is an error.
    fn download(&self, url: &str, destination: &mut dyn Write) -> Result<u64, IngestError>;
    /// Lightweight existence check; `Ok(true)` only for status 200.
    fn probe(&self, url: &str) -> Result<bool, IngestError>;
}

#[derive(Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> Result<Self, IngestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("wiki-pageviews/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| IngestError::Network(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .map_err(|err| IngestError::Network(err.to_string()))?;
        Ok(Self { client })
    }
}

impl PageviewSource for HttpSource {
    fn download(&self, url: &str, destination: &mut dyn Write) -> Result<u64, IngestError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| IngestError::Network(err.to_string()))?;
        if !response.status().is_success() {
            return Err(IngestError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        response
            .copy_to(destination)
            .map_err(|err| IngestError::Network(err.to_string()))
    }

    fn probe(&self, url: &str) -> Result<bool, IngestError> {
        let response = self
            .client
            .head(url)
            .timeout(Duration::from_secs(10))
            .send()
            .map_err(|err| IngestError::Network(err.to_string()))?;
        Ok(response.status() == StatusCode::OK)
    }
}
