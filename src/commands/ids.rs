use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use tracing::info;

use crate::cli::{DataLayout, IdsArgs};
use crate::commands::scrape::{build_client, fetch_html, work_items_to_table};
use crate::model::{IdsManifest, WorkItem};
use crate::tabular::write_table;
use crate::util::{now_utc_string, write_json_pretty};

pub fn run(args: IdsArgs) -> Result<()> {
    if args.end <= args.start {
        bail!(
            "end date {} must be after start date {}",
            args.end,
            args.start
        );
    }

    let layout = DataLayout::new(&args.data_root);
    let ids_path = args.ids_path.clone().unwrap_or_else(|| layout.ids_path());
    let client = build_client(
        &args.http.user_agent,
        Duration::from_secs(args.http.timeout_secs),
    )?;
    let delay = Duration::from_millis(args.http.request_delay_ms);
    let pattern = contest_row_pattern()?;

    info!(start = %args.start, end = %args.end, "collecting game ids");

    let mut days = Vec::new();
    for (position, date) in date_range(args.start, args.end).enumerate() {
        if position > 0 && !delay.is_zero() {
            thread::sleep(delay);
        }

        let url = scoreboard_url(&args.http.base_url, args.season_division_id, date);
        let html = fetch_html(&client, &url)
            .with_context(|| format!("failed to fetch scoreboard for {date}"))?;
        let ids = extract_game_ids(&html, &pattern);
        info!(date = %date, games = ids.len(), "scanned scoreboard");
        days.push((date, ids));
    }

    let items = flatten_days(&days);
    write_table(&ids_path, &work_items_to_table(&items))?;
    info!(path = %ids_path.display(), games = items.len(), "wrote work-item table");

    let manifest = IdsManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        start_date: args.start,
        end_date: args.end,
        days_scanned: days.len(),
        game_count: items.len(),
        ids_path: ids_path.display().to_string(),
    };
    let manifest_path = layout.manifest_dir().join("game_ids.json");
    write_json_pretty(&manifest_path, &manifest)?;

    Ok(())
}

/// Dates in `[start, end)`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |date| *date < end)
}

pub fn scoreboard_url(base_url: &str, season_division_id: u32, date: NaiveDate) -> String {
    format!(
        "{}/season_divisions/{}/livestream_scoreboards?utf8=%E2%9C%93&season_division_id=&game_date={:02}%2F{:02}%2F{}&conference_id=0&tournament_id=&commit=Submit",
        base_url.trim_end_matches('/'),
        season_division_id,
        date.month(),
        date.day(),
        date.year()
    )
}

pub fn contest_row_pattern() -> Result<Regex> {
    Regex::new(r#"<tr\s+id="contest_(\d+)""#).context("failed to compile contest row regex")
}

/// Game ids on one scoreboard page, first occurrence order, without repeats.
pub fn extract_game_ids(html: &str, pattern: &Regex) -> Vec<String> {
    let mut seen = HashSet::new();
    pattern
        .captures_iter(html)
        .filter_map(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

pub fn flatten_days(days: &[(NaiveDate, Vec<String>)]) -> Vec<WorkItem> {
    days.iter()
        .flat_map(|(date, ids)| {
            ids.iter().map(move |id| WorkItem {
                id: id.clone(),
                date: *date,
            })
        })
        .collect()
}
