//! Maps the fetched tables for one game onto the fixed record schema.
//!
//! Every field is described by an entry in [`FIELDS`]: where its value lives
//! (sub-resource, table position, row, column) or how it is derived from
//! earlier fields. Anything missing or malformed becomes null for that field
//! alone; extraction itself never fails.

use crate::model::WorkItem;
use crate::tabular::Table;

use super::documents::{RawDocumentSet, SubResource};

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Number(value) => Some(*value),
            Scalar::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(value) => Some(value),
            Scalar::Number(_) => None,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Scalar::Text(value) => value.clone(),
            Scalar::Number(value) => format_number(*value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Text,
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    GameId,
    Date,
    Cell {
        resource: SubResource,
        table: usize,
        row: usize,
        col: usize,
        kind: CellKind,
    },
    /// Positional slot in the officials list.
    Official(usize),
    Difference(&'static str, &'static str),
    Sum(&'static str, &'static str),
    /// `100 * made / attempted`, one decimal.
    Percentage(&'static str, &'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub source: FieldSource,
}

const BOX_SCORE_TABLE: usize = 1;
const TEAM_STATS_TABLE: usize = 3;
const OFFICIALS_TABLE: usize = 3;
const OFFICIAL_SLOTS: usize = 3;
const OFFICIAL_COLUMN: &str = "Official";

const HOME_ROW: usize = 1;
const AWAY_ROW: usize = 2;
const HOME_COL: usize = 1;
const AWAY_COL: usize = 2;

const fn field(name: &'static str, source: FieldSource) -> FieldSpec {
    FieldSpec { name, source }
}

const fn box_score(row: usize, col: usize, kind: CellKind) -> FieldSource {
    FieldSource::Cell {
        resource: SubResource::BoxScore,
        table: BOX_SCORE_TABLE,
        row,
        col,
        kind,
    }
}

const fn team_stat(row: usize, col: usize) -> FieldSource {
    FieldSource::Cell {
        resource: SubResource::TeamStats,
        table: TEAM_STATS_TABLE,
        row,
        col,
        kind: CellKind::Number,
    }
}

pub const FIELDS: &[FieldSpec] = &[
    field("Game_ID", FieldSource::GameId),
    field("Date", FieldSource::Date),
    field("Home_Team", box_score(HOME_ROW, 0, CellKind::Text)),
    field("Away_Team", box_score(AWAY_ROW, 0, CellKind::Text)),
    field("Home_Score_1H", box_score(HOME_ROW, 1, CellKind::Number)),
    field("Home_Score_2H", box_score(HOME_ROW, 2, CellKind::Number)),
    field("Home_Score_Final", box_score(HOME_ROW, 3, CellKind::Number)),
    field("Away_Score_1H", box_score(AWAY_ROW, 1, CellKind::Number)),
    field("Away_Score_2H", box_score(AWAY_ROW, 2, CellKind::Number)),
    field("Away_Score_Final", box_score(AWAY_ROW, 3, CellKind::Number)),
    field("Venue", box_score(4, 0, CellKind::Text)),
    field("Game_Time", box_score(3, 0, CellKind::Text)),
    field("Official_1", FieldSource::Official(0)),
    field("Official_2", FieldSource::Official(1)),
    field("Official_3", FieldSource::Official(2)),
    field("Home_Personal_Fouls", team_stat(9, HOME_COL)),
    field("Away_Personal_Fouls", team_stat(9, AWAY_COL)),
    field("Home_FTM", team_stat(7, HOME_COL)),
    field("Away_FTM", team_stat(7, AWAY_COL)),
    field("Home_FTA", team_stat(8, HOME_COL)),
    field("Away_FTA", team_stat(8, AWAY_COL)),
    field(
        "Home_FT_Percentage",
        FieldSource::Percentage("Home_FTM", "Home_FTA"),
    ),
    field(
        "Away_FT_Percentage",
        FieldSource::Percentage("Away_FTM", "Away_FTA"),
    ),
    field("Home_Technical_Fouls", team_stat(10, HOME_COL)),
    field("Away_Technical_Fouls", team_stat(10, AWAY_COL)),
    field("Home_Flagrant_Fouls", team_stat(11, HOME_COL)),
    field("Away_Flagrant_Fouls", team_stat(11, AWAY_COL)),
    field("Home_Fouls_1H", team_stat(12, HOME_COL)),
    field("Away_Fouls_1H", team_stat(12, AWAY_COL)),
    field("Home_Fouls_2H", team_stat(13, HOME_COL)),
    field("Away_Fouls_2H", team_stat(13, AWAY_COL)),
    field(
        "Foul_Differential",
        FieldSource::Difference("Home_Personal_Fouls", "Away_Personal_Fouls"),
    ),
    field(
        "Total_Fouls",
        FieldSource::Sum("Home_Personal_Fouls", "Away_Personal_Fouls"),
    ),
    field(
        "Free_Throw_Differential",
        FieldSource::Difference("Home_FTA", "Away_FTA"),
    ),
];

pub fn schema_headers() -> Vec<String> {
    FIELDS.iter().map(|spec| spec.name.to_string()).collect()
}

pub fn field_index(name: &str) -> Option<usize> {
    FIELDS.iter().position(|spec| spec.name == name)
}

/// One extracted game, values aligned with [`FIELDS`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRecord {
    values: Vec<Option<Scalar>>,
}

impl ExtractedRecord {
    pub fn get(&self, name: &str) -> Option<&Scalar> {
        field_index(name).and_then(|idx| self.values[idx].as_ref())
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Scalar::as_number)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Scalar::as_text)
    }

    pub fn to_row(&self) -> Vec<String> {
        self.values
            .iter()
            .map(|value| value.as_ref().map(Scalar::render).unwrap_or_default())
            .collect()
    }
}

pub fn extract_record(item: &WorkItem, documents: &RawDocumentSet) -> ExtractedRecord {
    let officials = officials(documents);
    let mut values: Vec<Option<Scalar>> = Vec::with_capacity(FIELDS.len());

    for spec in FIELDS {
        let value = match spec.source {
            FieldSource::GameId => Some(Scalar::Text(item.id.clone())),
            FieldSource::Date => Some(Scalar::Text(item.date.format("%Y-%m-%d").to_string())),
            FieldSource::Cell {
                resource,
                table,
                row,
                col,
                kind,
            } => documents
                .table(resource, table)
                .and_then(|table| table.cell(row, col))
                .and_then(|raw| coerce(raw, kind)),
            FieldSource::Official(slot) => officials.get(slot).cloned().map(Scalar::Text),
            FieldSource::Difference(left, right) => {
                derive(&values, left, right, |l, r| Some(l - r))
            }
            FieldSource::Sum(left, right) => derive(&values, left, right, |l, r| Some(l + r)),
            FieldSource::Percentage(made, attempted) => {
                derive(&values, made, attempted, |made, attempted| {
                    (attempted > 0.0).then(|| (made / attempted * 1000.0).round() / 10.0)
                })
            }
        };
        values.push(value);
    }

    ExtractedRecord { values }
}

fn derive(
    computed: &[Option<Scalar>],
    left: &str,
    right: &str,
    op: impl Fn(f64, f64) -> Option<f64>,
) -> Option<Scalar> {
    let lookup = |name: &str| {
        field_index(name)
            .and_then(|idx| computed.get(idx))
            .and_then(|value| value.as_ref())
            .and_then(Scalar::as_number)
    };
    op(lookup(left)?, lookup(right)?).map(Scalar::Number)
}

fn officials(documents: &RawDocumentSet) -> Vec<String> {
    let Some(table) = documents.table(SubResource::Officials, OFFICIALS_TABLE) else {
        return Vec::new();
    };
    let col = table.column_index(OFFICIAL_COLUMN).unwrap_or(0);

    table
        .rows
        .iter()
        .filter_map(|row| row.get(col))
        .filter_map(|name| clean_text(name))
        .take(OFFICIAL_SLOTS)
        .collect()
}

fn coerce(raw: &str, kind: CellKind) -> Option<Scalar> {
    match kind {
        CellKind::Text => clean_text(raw).map(Scalar::Text),
        CellKind::Number => parse_number(raw).map(Scalar::Number),
    }
}

fn clean_text(raw: &str) -> Option<String> {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

/// Lenient numeric parse: thousands separators and trailing `%`/`*` markers
/// are ignored, anything else non-numeric is `None`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', "");
    let cleaned = cleaned.trim_end_matches(['%', '*']).trim();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|value| value.is_finite())
}

pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
