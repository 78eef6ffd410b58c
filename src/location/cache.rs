use anyhow::Result;
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::db::Database;

use super::Coordinate;

pub const LAST_KNOWN_POSITION_KEY: &str = "lastKnownPosition";

/// Storage for the single most recent coordinate.
#[async_trait]
pub trait CoordinateCache: Send + Sync {
    async fn load(&self) -> Result<Option<Coordinate>>;
    async fn store(&self, coord: &Coordinate) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCoords {
    latitude: f64,
    longitude: f64,
}

/// `{"coords":{"latitude":..,"longitude":..},"timestamp":<epoch ms>}`
#[derive(Debug, Serialize, Deserialize)]
struct StoredPosition {
    coords: StoredCoords,
    timestamp: i64,
}

impl From<&Coordinate> for StoredPosition {
    fn from(coord: &Coordinate) -> Self {
        Self {
            coords: StoredCoords {
                latitude: coord.latitude,
                longitude: coord.longitude,
            },
            timestamp: coord.captured_at,
        }
    }
}

impl From<StoredPosition> for Coordinate {
    fn from(stored: StoredPosition) -> Self {
        Self {
            latitude: stored.coords.latitude,
            longitude: stored.coords.longitude,
            captured_at: stored.timestamp,
        }
    }
}

pub struct SqliteCoordinateCache {
    db: Database,
}

impl SqliteCoordinateCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CoordinateCache for SqliteCoordinateCache {
    /// An unreadable stored value is removed and reported as absent.
    async fn load(&self) -> Result<Option<Coordinate>> {
        let Some(raw) = self.db.get_value(LAST_KNOWN_POSITION_KEY).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<StoredPosition>(&raw) {
            Ok(stored) => Ok(Some(stored.into())),
            Err(err) => {
                warn!("Error parsing cached position: {err}");
                self.db.remove_value(LAST_KNOWN_POSITION_KEY).await?;
                Ok(None)
            }
        }
    }

    async fn store(&self, coord: &Coordinate) -> Result<()> {
        let serialized = serde_json::to_string(&StoredPosition::from(coord))?;
        self.db.put_value(LAST_KNOWN_POSITION_KEY, serialized).await
    }
}
