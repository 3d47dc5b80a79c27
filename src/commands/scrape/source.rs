use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::model::WorkItem;
use crate::tabular::{Table, headers_of, read_table};

pub const DATE_COLUMN: &str = "Date";
pub const ID_COLUMN: &str = "Game ID";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn work_item_headers() -> Vec<String> {
    headers_of(&[DATE_COLUMN, ID_COLUMN])
}

pub fn load_work_items(path: &Path) -> Result<Vec<WorkItem>> {
    let table = read_table(path)
        .with_context(|| format!("failed to load work items from {}", path.display()))?;
    let items = work_items_from_table(&table)
        .with_context(|| format!("invalid work-item table {}", path.display()))?;

    info!(path = %path.display(), items = items.len(), "loaded work items");
    Ok(items)
}

pub fn work_items_from_table(table: &Table) -> Result<Vec<WorkItem>> {
    let date_col = table
        .column_index(DATE_COLUMN)
        .with_context(|| format!("missing `{DATE_COLUMN}` column"))?;
    let id_col = table
        .column_index(ID_COLUMN)
        .with_context(|| format!("missing `{ID_COLUMN}` column"))?;

    let mut items = Vec::with_capacity(table.rows.len());
    let mut seen = HashSet::new();
    let mut duplicates = 0_usize;

    for (idx, row) in table.rows.iter().enumerate() {
        // +2: one for the header, one for 1-based numbering.
        let line = idx + 2;
        let raw_date = row.get(date_col).map(|value| value.trim()).unwrap_or("");
        let id = row.get(id_col).map(|value| value.trim()).unwrap_or("");

        if id.is_empty() {
            bail!("row {line}: empty game id");
        }
        let date = NaiveDate::parse_from_str(raw_date, DATE_FORMAT)
            .with_context(|| format!("row {line}: invalid date `{raw_date}`"))?;

        if !seen.insert(id.to_string()) {
            duplicates += 1;
        }
        items.push(WorkItem {
            id: id.to_string(),
            date,
        });
    }

    if duplicates > 0 {
        warn!(duplicates, "work list repeats game ids across days; keeping file order");
    }

    Ok(items)
}

pub fn work_items_to_table(items: &[WorkItem]) -> Table {
    let mut table = Table::new(work_item_headers());
    table.rows = items
        .iter()
        .map(|item| vec![item.date.format(DATE_FORMAT).to_string(), item.id.clone()])
        .collect();
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::parse_table;

    #[test]
    fn loads_items_in_file_order() {
        let table = parse_table("Date,Game ID\n2024-11-04,5800001\n2024-11-04,5800002\n2024-11-05,5800003\n");
        let items = work_items_from_table(&table).unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].id, "5800001");
        assert_eq!(items[2].date, NaiveDate::from_ymd_opt(2024, 11, 5).unwrap());
        assert_eq!(work_items_to_table(&items), table);
    }

    #[test]
    fn column_order_and_case_do_not_matter() {
        let table = parse_table("game id,date\n5800001,2024-11-04\n");
        let items = work_items_from_table(&table).unwrap();

        assert_eq!(items[0].id, "5800001");
        assert_eq!(items[0].date, NaiveDate::from_ymd_opt(2024, 11, 4).unwrap());
    }

    #[test]
    fn malformed_rows_are_configuration_errors() {
        let bad_date = parse_table("Date,Game ID\n2024-11-04,1\n11/05/2024,2\n");
        let err = work_items_from_table(&bad_date).unwrap_err();
        assert!(format!("{err:#}").contains("row 3"));

        let missing_id = parse_table("Date,Game ID\n2024-11-04,\n");
        assert!(work_items_from_table(&missing_id).is_err());

        let missing_column = parse_table("Date\n2024-11-04\n");
        assert!(work_items_from_table(&missing_column).is_err());
    }
}
