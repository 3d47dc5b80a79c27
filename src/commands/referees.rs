use std::collections::HashMap;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::{DataLayout, RefereesArgs};
use crate::tabular::{Table, headers_of, read_table, write_table};

pub const OFFICIAL_COLUMNS: [&str; 3] = ["Official_1", "Official_2", "Official_3"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefereeCount {
    pub referee: String,
    pub games: usize,
    pub rank: usize,
}

pub fn run(args: RefereesArgs) -> Result<()> {
    let layout = DataLayout::new(&args.data_root);
    let final_path = args.final_path.unwrap_or_else(|| layout.final_path());
    let output_path = args
        .output_path
        .unwrap_or_else(|| layout.report_dir().join("referee_games.csv"));

    let dataset = read_table(&final_path)?;
    let counts = count_referees(&dataset)?;

    info!(games = dataset.rows.len(), referees = counts.len(), "counted referee assignments");
    for entry in counts.iter().take(args.top) {
        info!(rank = entry.rank, referee = %entry.referee, games = entry.games, "top referee");
    }

    write_table(&output_path, &referee_table(&counts))?;
    info!(path = %output_path.display(), "wrote referee report");

    Ok(())
}

/// Positions of the official columns: `Official_1..3` when all are present,
/// otherwise the first three headers mentioning an official or referee.
pub fn official_columns(table: &Table) -> Result<Vec<usize>> {
    let exact: Vec<usize> = OFFICIAL_COLUMNS
        .iter()
        .filter_map(|name| table.column_index(name))
        .collect();
    if exact.len() == OFFICIAL_COLUMNS.len() {
        return Ok(exact);
    }

    let fallback: Vec<usize> = table
        .headers
        .iter()
        .enumerate()
        .filter(|(_, header)| {
            let lower = header.to_ascii_lowercase();
            lower.contains("official") || lower.contains("ref")
        })
        .map(|(idx, _)| idx)
        .take(OFFICIAL_COLUMNS.len())
        .collect();

    if fallback.is_empty() {
        bail!("dataset has no official columns");
    }
    warn!(columns = ?fallback, "Official_1..3 not all present; using detected columns");
    Ok(fallback)
}

/// Non-blank official names on one row.
pub fn officials_in_row<'a>(row: &'a [String], columns: &[usize]) -> Vec<&'a str> {
    columns
        .iter()
        .filter_map(|&col| row.get(col))
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Games per referee, most active first, ties broken by name.
pub fn count_referees(dataset: &Table) -> Result<Vec<RefereeCount>> {
    let columns = official_columns(dataset)?;

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for row in &dataset.rows {
        for name in officials_in_row(row, &columns) {
            *counts.entry(name).or_default() += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    Ok(ranked
        .into_iter()
        .enumerate()
        .map(|(idx, (referee, games))| RefereeCount {
            referee: referee.to_string(),
            games,
            rank: idx + 1,
        })
        .collect())
}

pub fn referee_table(counts: &[RefereeCount]) -> Table {
    let mut table = Table::new(headers_of(&["Referee", "Games_Officiated", "Rank"]));
    table.rows = counts
        .iter()
        .map(|entry| {
            vec![
                entry.referee.clone(),
                entry.games.to_string(),
                entry.rank.to_string(),
            ]
        })
        .collect();
    table
}
