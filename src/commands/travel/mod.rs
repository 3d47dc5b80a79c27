//! Referee travel: geocode venues, then sum the distances each referee covers
//! between consecutive games.

mod geocode;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::thread;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::cli::{DataLayout, TravelArgs};
use crate::commands::referees::{official_columns, officials_in_row};
use crate::model::{RefereeTravel, TravelLeg};
use crate::tabular::{Table, headers_of, read_table, write_table};
use crate::util::write_json_pretty;

pub use geocode::{Coordinates, Geocoder, NominatimGeocoder, VenueCache, haversine_miles};

/// One game as seen by the travel analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct GameVisit {
    pub date: NaiveDate,
    pub venue: String,
    pub officials: Vec<String>,
}

pub fn run(args: TravelArgs) -> Result<()> {
    let layout = DataLayout::new(&args.data_root);
    let final_path = args.final_path.unwrap_or_else(|| layout.final_path());
    let cache_path = args.cache_path.unwrap_or_else(|| layout.venue_cache_path());
    let output_path = args
        .output_path
        .unwrap_or_else(|| layout.report_dir().join("referee_travel.csv"));
    let details_path = args
        .details_path
        .unwrap_or_else(|| layout.report_dir().join("referee_travel_details.json"));

    let dataset = read_table(&final_path)?;
    let games = game_visits(&dataset)?;
    info!(games = games.len(), "loaded games for travel analysis");

    let cache = VenueCache::open(&cache_path)?;
    let geocoder = NominatimGeocoder::new(
        &args.geocoder_url,
        &args.geocoder_user_agent,
        Duration::from_secs(args.timeout_secs),
    )?;
    let venues = distinct_venues(&games);
    let coordinates = resolve_venues(
        &venues,
        &cache,
        &geocoder,
        Duration::from_millis(args.geocode_delay_ms),
    )?;
    info!(
        resolved = coordinates.len(),
        venues = venues.len(),
        cached = cache.len()?,
        "geocoded venues"
    );

    let travel = referee_travel(&games, &coordinates);
    write_table(&output_path, &travel_table(&travel))?;
    write_json_pretty(&details_path, &travel)?;

    if let Some(top) = travel.first() {
        info!(
            referee = %top.referee,
            miles = top.total_travel_miles,
            "most traveled referee"
        );
    }
    info!(
        referees = travel.len(),
        path = %output_path.display(),
        details = %details_path.display(),
        "wrote referee travel report"
    );

    Ok(())
}

fn find_column(table: &Table, exact: &str, fragment: &str) -> Option<usize> {
    table.column_index(exact).or_else(|| {
        table
            .headers
            .iter()
            .position(|header| header.to_ascii_lowercase().contains(fragment))
    })
}

/// Games with a parseable date, in file order. Rows without one are skipped.
pub fn game_visits(dataset: &Table) -> Result<Vec<GameVisit>> {
    let Some(date_col) = find_column(dataset, "Date", "date") else {
        bail!("dataset has no date column");
    };
    let Some(venue_col) = find_column(dataset, "Venue", "venue") else {
        bail!("dataset has no venue column");
    };
    let official_cols = official_columns(dataset)?;

    let mut games = Vec::with_capacity(dataset.rows.len());
    let mut undated = 0_usize;
    for row in &dataset.rows {
        let raw_date = row.get(date_col).map(|value| value.trim()).unwrap_or("");
        let Ok(date) = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d") else {
            undated += 1;
            continue;
        };

        let mut officials: Vec<String> = Vec::new();
        for name in officials_in_row(row, &official_cols) {
            if !officials.iter().any(|seen| seen == name) {
                officials.push(name.to_string());
            }
        }

        games.push(GameVisit {
            date,
            venue: row
                .get(venue_col)
                .map(|value| value.trim().to_string())
                .unwrap_or_default(),
            officials,
        });
    }

    if undated > 0 {
        warn!(rows = undated, "skipped games without a parseable date");
    }
    Ok(games)
}

/// Non-blank venues in first-seen order.
pub fn distinct_venues(games: &[GameVisit]) -> Vec<String> {
    let mut seen = HashSet::new();
    games
        .iter()
        .map(|game| game.venue.as_str())
        .filter(|venue| !venue.is_empty())
        .filter(|venue| seen.insert(*venue))
        .map(str::to_string)
        .collect()
}

/// Looks every venue up in the cache first and asks the geocoder only on a
/// miss, pausing `delay` between geocoder calls. Lookup failures are logged
/// and leave the venue unresolved.
pub fn resolve_venues<G: Geocoder + ?Sized>(
    venues: &[String],
    cache: &VenueCache,
    geocoder: &G,
    delay: Duration,
) -> Result<HashMap<String, Coordinates>> {
    let mut resolved = HashMap::new();
    let mut lookups = 0_usize;

    for venue in venues {
        if let Some(coordinates) = cache.get(venue)? {
            resolved.insert(venue.clone(), coordinates);
            continue;
        }

        if lookups > 0 && !delay.is_zero() {
            thread::sleep(delay);
        }
        lookups += 1;

        match geocoder.geocode(venue) {
            Ok(Some(coordinates)) => {
                debug!(venue = %venue, lat = coordinates.latitude, lon = coordinates.longitude, "geocoded venue");
                cache.put(venue, coordinates)?;
                resolved.insert(venue.clone(), coordinates);
            }
            Ok(None) => warn!(venue = %venue, "venue not found by geocoder"),
            Err(err) => warn!(venue = %venue, error = %format!("{err:#}"), "geocoding failed"),
        }
    }

    Ok(resolved)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Travel per referee with more than one game, most miles first.
pub fn referee_travel(
    games: &[GameVisit],
    coordinates: &HashMap<String, Coordinates>,
) -> Vec<RefereeTravel> {
    let mut by_referee: BTreeMap<&str, Vec<&GameVisit>> = BTreeMap::new();
    for game in games {
        for referee in &game.officials {
            by_referee.entry(referee.as_str()).or_default().push(game);
        }
    }

    let mut travel: Vec<RefereeTravel> = by_referee
        .into_iter()
        .filter(|(_, visits)| visits.len() > 1)
        .map(|(referee, mut visits)| {
            visits.sort_by_key(|visit| visit.date);

            let mut total = 0.0;
            let mut legs = Vec::new();
            for pair in visits.windows(2) {
                let (from, to) = (pair[0], pair[1]);
                let (Some(&a), Some(&b)) =
                    (coordinates.get(&from.venue), coordinates.get(&to.venue))
                else {
                    continue;
                };
                let distance = haversine_miles(a, b);
                if distance <= 0.0 {
                    continue;
                }
                total += distance;
                legs.push(TravelLeg {
                    date: to.date,
                    from_venue: from.venue.clone(),
                    to_venue: to.venue.clone(),
                    distance: round2(distance),
                });
            }

            let trips = visits.len() - 1;
            RefereeTravel {
                referee: referee.to_string(),
                games_officiated: visits.len(),
                total_travel_miles: round2(total),
                avg_miles_per_trip: round2(total / trips as f64),
                max_single_trip: legs.iter().map(|leg| leg.distance).fold(0.0, f64::max),
                travel_legs: legs,
            }
        })
        .collect();

    travel.sort_by(|a, b| {
        b.total_travel_miles
            .total_cmp(&a.total_travel_miles)
            .then_with(|| a.referee.cmp(&b.referee))
    });
    travel
}

pub fn travel_table(travel: &[RefereeTravel]) -> Table {
    let mut table = Table::new(headers_of(&[
        "Referee",
        "Games_Officiated",
        "Total_Travel_Miles",
        "Avg_Miles_Per_Trip",
        "Max_Single_Trip",
    ]));
    table.rows = travel
        .iter()
        .map(|entry| {
            vec![
                entry.referee.clone(),
                entry.games_officiated.to_string(),
                entry.total_travel_miles.to_string(),
                entry.avg_miles_per_trip.to_string(),
                entry.max_single_trip.to_string(),
            ]
        })
        .collect();
    table
}
