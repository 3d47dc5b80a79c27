use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::blocking::Client;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;

use crate::commands::scrape::build_client;
use crate::util::ensure_parent;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Resolves a free-text venue to coordinates. `Ok(None)` means the service
/// answered but knew no such place.
pub trait Geocoder {
    fn geocode(&self, venue: &str) -> Result<Option<Coordinates>>;
}

pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(user_agent, timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl Geocoder for NominatimGeocoder {
    fn geocode(&self, venue: &str) -> Result<Option<Coordinates>> {
        let url = format!("{}/search", self.base_url);
        let places: Vec<NominatimPlace> = self
            .client
            .get(&url)
            .query(&[("q", venue), ("format", "json"), ("limit", "1")])
            .send()
            .with_context(|| format!("geocoding request failed for `{venue}`"))?
            .error_for_status()
            .with_context(|| format!("geocoder rejected `{venue}`"))?
            .json()
            .with_context(|| format!("invalid geocoder response for `{venue}`"))?;

        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };
        Ok(Some(Coordinates {
            latitude: place
                .lat
                .parse()
                .with_context(|| format!("invalid latitude `{}`", place.lat))?,
            longitude: place
                .lon
                .parse()
                .with_context(|| format!("invalid longitude `{}`", place.lon))?,
        }))
    }
}

/// Persistent venue -> coordinates map. Only successful lookups are stored.
pub struct VenueCache {
    connection: Connection,
}

impl VenueCache {
    pub fn open(path: &Path) -> Result<Self> {
        ensure_parent(path)?;
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open venue cache: {}", path.display()))?;

        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to set journal_mode=WAL for venue cache")?;
        connection
            .pragma_update(None, "synchronous", "NORMAL")
            .context("failed to set synchronous=NORMAL for venue cache")?;

        Self::with_connection(connection)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory venue cache")?;
        Self::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> Result<Self> {
        connection
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS venue_cache (
                  venue TEXT PRIMARY KEY,
                  latitude REAL NOT NULL,
                  longitude REAL NOT NULL,
                  resolved_at TEXT NOT NULL
                );
                ",
            )
            .context("failed to create venue cache schema")?;
        Ok(Self { connection })
    }

    pub fn get(&self, venue: &str) -> Result<Option<Coordinates>> {
        self.connection
            .query_row(
                "SELECT latitude, longitude FROM venue_cache WHERE venue = ?1",
                [venue],
                |row| {
                    Ok(Coordinates {
                        latitude: row.get(0)?,
                        longitude: row.get(1)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("failed to read venue cache for `{venue}`"))
    }

    pub fn put(&self, venue: &str, coordinates: Coordinates) -> Result<()> {
        self.connection
            .execute(
                "INSERT INTO venue_cache(venue, latitude, longitude, resolved_at)
                 VALUES(?1, ?2, ?3, ?4)
                 ON CONFLICT(venue) DO UPDATE SET
                   latitude=excluded.latitude,
                   longitude=excluded.longitude,
                   resolved_at=excluded.resolved_at",
                params![
                    venue,
                    coordinates.latitude,
                    coordinates.longitude,
                    Utc::now()
                ],
            )
            .with_context(|| format!("failed to store venue `{venue}`"))?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM venue_cache", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Great-circle distance in miles.
pub fn haversine_miles(from: Coordinates, to: Coordinates) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (to.longitude - from.longitude).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * a.sqrt().min(1.0).asin()
}
