//! Where fresh positions come from.

use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::LocationError;

pub const DEFAULT_IP_LOOKUP_URL: &str = "http://ip-api.com/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// A source may answer from its own cache if the value is younger.
    pub maximum_age: Duration,
}

impl Default for PositionOptions {
    /// Speed over precision.
    fn default() -> Self {
        Self {
            high_accuracy: false,
            timeout: Duration::from_secs(30),
            maximum_age: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

#[async_trait]
pub trait PositionSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// A configured source answers instantly and always wins over a cached
    /// coordinate from some earlier source.
    fn is_configured(&self) -> bool {
        false
    }

    async fn current_position(&self, options: &PositionOptions) -> Result<Position, LocationError>;
}

/// Coordinates supplied by the user.
pub struct FixedPositionSource {
    position: Position,
}

impl FixedPositionSource {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            position: Position {
                latitude,
                longitude,
            },
        }
    }
}

#[async_trait]
impl PositionSource for FixedPositionSource {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn current_position(&self, _options: &PositionOptions) -> Result<Position, LocationError> {
        Ok(self.position)
    }
}

/// Location turned off in settings: every request is refused.
pub struct DisabledPositionSource;

#[async_trait]
impl PositionSource for DisabledPositionSource {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn current_position(&self, _options: &PositionOptions) -> Result<Position, LocationError> {
        Err(LocationError::Denied(
            "location is disabled in settings".to_string(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct IpLookupResponse {
    status: String,
    lat: Option<f64>,
    lon: Option<f64>,
    message: Option<String>,
}

/// Approximate position from the public IP address.
pub struct IpPositionSource {
    http: Client,
    url: String,
    last: Mutex<Option<(Instant, Position)>>,
}

impl IpPositionSource {
    pub fn new(url: &str) -> Result<Self, LocationError> {
        let http = Client::builder()
            .user_agent(format!("adhan-alarm/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LocationError::Unknown(e.to_string()))?;

        Ok(Self {
            http,
            url: url.to_string(),
            last: Mutex::new(None),
        })
    }

    fn recent(&self, maximum_age: Duration) -> Option<Position> {
        let guard = self.last.lock().ok()?;
        guard
            .as_ref()
            .filter(|(at, _)| at.elapsed() < maximum_age)
            .map(|(_, position)| *position)
    }

    fn remember(&self, position: Position) {
        if let Ok(mut guard) = self.last.lock() {
            *guard = Some((Instant::now(), position));
        }
    }
}

#[async_trait]
impl PositionSource for IpPositionSource {
    fn name(&self) -> &'static str {
        "ip-lookup"
    }

    async fn current_position(&self, options: &PositionOptions) -> Result<Position, LocationError> {
        if let Some(position) = self.recent(options.maximum_age) {
            return Ok(position);
        }

        let response = self
            .http
            .get(&self.url)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LocationError::Timeout
                } else if e.is_connect() {
                    LocationError::Unavailable(e.to_string())
                } else {
                    LocationError::Unknown(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LocationError::Denied(format!(
                "lookup service refused the request ({status})"
            )));
        }
        if !status.is_success() {
            return Err(LocationError::Unavailable(format!(
                "lookup service returned {status}"
            )));
        }

        let body: IpLookupResponse = response
            .json()
            .await
            .map_err(|e| LocationError::Unavailable(format!("unreadable lookup response: {e}")))?;

        match (body.status.as_str(), body.lat, body.lon) {
            ("success", Some(latitude), Some(longitude)) => {
                let position = Position {
                    latitude,
                    longitude,
                };
                self.remember(position);
                Ok(position)
            }
            _ => Err(LocationError::Unavailable(
                body.message
                    .unwrap_or_else(|| format!("lookup status '{}'", body.status)),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fixed_and_disabled_sources() {
        let options = PositionOptions::default();
        let fixed = FixedPositionSource::new(1.5, 2.5);
        assert_eq!(
            fixed.current_position(&options).await.unwrap(),
            Position {
                latitude: 1.5,
                longitude: 2.5
            }
        );

        assert!(matches!(
            DisabledPositionSource.current_position(&options).await,
            Err(LocationError::Denied(_))
        ));
    }

    #[tokio::test]
    async fn ip_lookup_success_is_cached_for_maximum_age() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "lat": 24.7136,
                "lon": 46.6753
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = IpPositionSource::new(&server.uri()).unwrap();
        let options = PositionOptions::default();

        let first = source.current_position(&options).await.unwrap();
        let second = source.current_position(&options).await.unwrap();
        assert_eq!(first.latitude, 24.7136);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn ip_lookup_failure_status_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "fail",
                "message": "private range"
            })))
            .mount(&server)
            .await;

        let source = IpPositionSource::new(&server.uri()).unwrap();
        let err = source
            .current_position(&PositionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LocationError::Unavailable(ref m) if m == "private range"));
    }

    #[tokio::test]
    async fn ip_lookup_forbidden_is_denied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let source = IpPositionSource::new(&server.uri()).unwrap();
        assert!(matches!(
            source.current_position(&PositionOptions::default()).await,
            Err(LocationError::Denied(_))
        ));
    }
}
