//! Resolves the coordinates prayer times are computed for.
//!
//! A coordinate younger than an hour is reused as-is. Older or missing
//! coordinates trigger a request to the configured [`PositionSource`]; when
//! that fails, any cached coordinate is better than none.

pub mod cache;
pub mod source;

pub use cache::{CoordinateCache, SqliteCoordinateCache};
pub use source::{
    DisabledPositionSource, FixedPositionSource, IpPositionSource, Position, PositionOptions,
    PositionSource,
};

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;

use crate::debug_log::AppendOnlyLog;

const ENABLE_LOGS: bool = true;
use crate::{log_info, log_warn};

/// Cached coordinates younger than this are reused without a new request.
pub const FRESHNESS_WINDOW_MS: i64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
    /// Epoch milliseconds.
    pub captured_at: i64,
}

impl Coordinate {
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms - self.captured_at < FRESHNESS_WINDOW_MS
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocationError {
    #[error("Geolocation is not supported: no position source is configured")]
    Unsupported,

    #[error("location permission denied: {0}")]
    Denied(String),

    #[error("location unavailable: {0}")]
    Unavailable(String),

    #[error("location request timed out")]
    Timeout,

    #[error("unknown location error: {0}")]
    Unknown(String),
}

impl LocationError {
    pub fn user_message(&self) -> &'static str {
        match self {
            LocationError::Unsupported => {
                "Geolocation is not available. Set --latitude/--longitude or enable IP lookup in settings."
            }
            LocationError::Denied(_) => {
                "Location access was denied. Please enable location in settings and restart."
            }
            LocationError::Unavailable(_) => {
                "Location information is unavailable. Please check your location settings."
            }
            LocationError::Timeout => {
                "Location request timed out. Please check your internet connection and try again."
            }
            LocationError::Unknown(_) => "An unknown error occurred while getting location.",
        }
    }

    fn class(&self) -> &'static str {
        match self {
            LocationError::Unsupported => "unsupported",
            LocationError::Denied(_) => "denied",
            LocationError::Unavailable(_) => "unavailable",
            LocationError::Timeout => "timeout",
            LocationError::Unknown(_) => "unknown",
        }
    }
}

#[derive(Clone)]
pub struct LocationProvider {
    source: Option<Arc<dyn PositionSource>>,
    cache: Arc<dyn CoordinateCache>,
    debug_log: Arc<dyn AppendOnlyLog>,
    options: PositionOptions,
}

impl LocationProvider {
    pub fn new(
        source: Option<Arc<dyn PositionSource>>,
        cache: Arc<dyn CoordinateCache>,
        debug_log: Arc<dyn AppendOnlyLog>,
    ) -> Self {
        Self {
            source,
            cache,
            debug_log,
            options: PositionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PositionOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn resolve(&self) -> Result<Coordinate, LocationError> {
        self.resolve_at(Utc::now().timestamp_millis()).await
    }

    pub async fn resolve_at(&self, now_ms: i64) -> Result<Coordinate, LocationError> {
        let Some(source) = self.source.clone() else {
            self.debug_log
                .append("Geolocation is not supported: no position source configured");
            return Err(LocationError::Unsupported);
        };

        if source.is_configured() {
            let position = self.request(source.as_ref()).await?;
            let coord = Coordinate {
                latitude: position.latitude,
                longitude: position.longitude,
                captured_at: now_ms,
            };
            self.debug_log.append_data(
                "Using configured position",
                json!({ "latitude": coord.latitude, "longitude": coord.longitude }),
            );
            self.persist(&coord).await;
            return Ok(coord);
        }

        let cached = self.load_cached().await;

        if let Some(coord) = cached.filter(|c| c.is_fresh(now_ms)) {
            log_info!("Using cached position ({} ms old)", now_ms - coord.captured_at);
            self.debug_log.append_data(
                "Using cached position",
                json!({ "ageMs": now_ms - coord.captured_at }),
            );
            self.spawn_background_refresh(source);
            return Ok(coord);
        }

        match self.request(source.as_ref()).await {
            Ok(position) => {
                let coord = Coordinate {
                    latitude: position.latitude,
                    longitude: position.longitude,
                    captured_at: now_ms,
                };
                self.debug_log.append_data(
                    "Location received",
                    json!({
                        "source": source.name(),
                        "latitude": coord.latitude,
                        "longitude": coord.longitude,
                    }),
                );
                self.persist(&coord).await;
                Ok(coord)
            }
            Err(err) => {
                self.debug_log.append_data(
                    "Location request failed",
                    json!({
                        "class": err.class(),
                        "error": err.to_string(),
                        "hasCache": cached.is_some(),
                    }),
                );

                match cached {
                    Some(coord) => {
                        log_warn!("Using cached position due to error: {err}");
                        Ok(coord)
                    }
                    None => Err(err),
                }
            }
        }
    }

    async fn request(&self, source: &dyn PositionSource) -> Result<Position, LocationError> {
        tokio::time::timeout(self.options.timeout, source.current_position(&self.options))
            .await
            .map_err(|_| LocationError::Timeout)?
    }

    async fn load_cached(&self) -> Option<Coordinate> {
        match self.cache.load().await {
            Ok(cached) => cached,
            Err(err) => {
                log_warn!("Error reading cached position: {err:?}");
                self.debug_log.append_data(
                    "Error reading cached position",
                    json!({ "error": err.to_string() }),
                );
                None
            }
        }
    }

    async fn persist(&self, coord: &Coordinate) {
        if let Err(err) = self.cache.store(coord).await {
            log_warn!("Error caching position: {err:?}");
            self.debug_log
                .append_data("Error caching position", json!({ "error": err.to_string() }));
        }
    }

    /// Fire-and-forget refresh of the cache; failures are only logged.
    fn spawn_background_refresh(&self, source: Arc<dyn PositionSource>) {
        let provider = self.clone();
        tokio::spawn(async move {
            match provider.request(source.as_ref()).await {
                Ok(position) => {
                    let coord = Coordinate {
                        latitude: position.latitude,
                        longitude: position.longitude,
                        captured_at: Utc::now().timestamp_millis(),
                    };
                    provider.persist(&coord).await;
                }
                Err(err) => {
                    log_warn!("Background position update failed: {err}");
                    provider.debug_log.append_data(
                        "Background position update failed",
                        json!({ "error": err.to_string() }),
                    );
                }
            }
        });
    }
}
