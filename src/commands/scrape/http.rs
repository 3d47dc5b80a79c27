use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::cli::HttpArgs;
use crate::model::WorkItem;
use crate::tabular::Table;

use super::documents::{RawDocumentSet, ResourceFetcher, SubResource};

pub fn build_client(user_agent: &str, timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")
}

pub fn fetch_html(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .header("Accept", "text/html")
        .send()
        .with_context(|| format!("request failed: {url}"))?
        .error_for_status()
        .with_context(|| format!("unexpected status from {url}"))?;

    response
        .text()
        .with_context(|| format!("failed to read body from {url}"))
}

/// Fetches the three per-game pages sequentially, pausing between requests.
pub struct HttpFetcher {
    client: Client,
    base_url: String,
    request_delay: Duration,
    selectors: TableSelectors,
}

impl HttpFetcher {
    pub fn new(args: &HttpArgs) -> Result<Self> {
        Ok(Self {
            client: build_client(&args.user_agent, Duration::from_secs(args.timeout_secs))?,
            base_url: args.base_url.trim_end_matches('/').to_string(),
            request_delay: Duration::from_millis(args.request_delay_ms),
            selectors: TableSelectors::new()?,
        })
    }

    pub fn resource_url(&self, item: &WorkItem, resource: SubResource) -> String {
        format!("{}/contests/{}/{}", self.base_url, item.id, resource.key())
    }
}

impl ResourceFetcher for HttpFetcher {
    fn fetch(&self, item: &WorkItem) -> Result<RawDocumentSet> {
        let mut documents = RawDocumentSet::default();

        for (position, resource) in SubResource::ALL.into_iter().enumerate() {
            if position > 0 && !self.request_delay.is_zero() {
                thread::sleep(self.request_delay);
            }

            let url = self.resource_url(item, resource);
            let html = fetch_html(&self.client, &url)
                .with_context(|| format!("failed to fetch {}", resource.key()))?;
            let tables = self.selectors.parse_tables(&html);
            debug!(game_id = %item.id, resource = resource.key(), tables = tables.len(), "fetched resource");
            documents.insert(resource, tables);
        }

        Ok(documents)
    }
}

pub struct TableSelectors {
    table: Selector,
    row: Selector,
    cell: Selector,
}

impl TableSelectors {
    pub fn new() -> Result<Self> {
        let parse = |css: &str| Selector::parse(css).map_err(|err| anyhow!("invalid selector `{css}`: {err}"));
        Ok(Self {
            table: parse("table")?,
            row: parse("tr")?,
            cell: parse("th, td")?,
        })
    }

    /// Every `<table>` in document order. A leading row inside `<thead>`, or
    /// made only of `<th>` cells, becomes the header; the rest are data rows.
    pub fn parse_tables(&self, html: &str) -> Vec<Table> {
        let document = Html::parse_document(html);
        document
            .select(&self.table)
            .map(|table| self.parse_table(table))
            .collect()
    }

    fn parse_table(&self, table: ElementRef<'_>) -> Table {
        let mut rows = table.select(&self.row).peekable();
        let mut parsed = Table::default();

        let header = rows.peek().copied().filter(|row| is_header_row(*row));
        if let Some(header) = header {
            parsed.headers = self.cells(header);
            rows.next();
        }

        parsed.rows = rows.map(|row| self.cells(row)).collect();
        parsed
    }

    fn cells(&self, row: ElementRef<'_>) -> Vec<String> {
        row.select(&self.cell)
            .map(|cell| {
                cell.text()
                    .flat_map(str::split_whitespace)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }
}

fn is_header_row(row: ElementRef<'_>) -> bool {
    let in_thead = row
        .parent()
        .and_then(ElementRef::wrap)
        .is_some_and(|parent| parent.value().name() == "thead");
    if in_thead {
        return true;
    }

    let mut cells = row
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|child| matches!(child.value().name(), "th" | "td"))
        .peekable();
    cells.peek().is_some() && cells.all(|cell| cell.value().name() == "th")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tables_with_thead_and_th_headers() {
        let html = r#"
            <html><body>
              <table><tr><td>layout only</td></tr></table>
              <table>
                <thead><tr><th>Team</th><td>1st</td><td>2nd</td><td>Total</td></tr></thead>
                <tbody>
                  <tr><td>  Duke
                       Blue Devils </td><td>40</td><td>38</td><td>78</td></tr>
                  <tr><td>North Carolina</td><td>35</td><td>36</td><td>71</td></tr>
                </tbody>
              </table>
              <table>
                <tr><th>Official</th></tr>
                <tr><td><a href="/people/1">Ref One</a></td></tr>
              </table>
            </body></html>
        "#;

        let tables = TableSelectors::new().unwrap().parse_tables(html);

        assert_eq!(tables.len(), 3);
        assert!(tables[0].headers.is_empty());
        assert_eq!(tables[0].cell(0, 0), Some("layout only"));

        assert_eq!(tables[1].headers, vec!["Team", "1st", "2nd", "Total"]);
        assert_eq!(tables[1].cell(0, 0), Some("Duke Blue Devils"));
        assert_eq!(tables[1].cell(1, 3), Some("71"));

        assert_eq!(tables[2].headers, vec!["Official"]);
        assert_eq!(tables[2].cell(0, 0), Some("Ref One"));
    }

    #[test]
    fn page_without_tables_yields_nothing() {
        let tables = TableSelectors::new()
            .unwrap()
            .parse_tables("<html><body><p>Contest not found</p></body></html>");
        assert!(tables.is_empty());
    }

    #[test]
    fn resource_urls_follow_contest_layout() {
        let args = HttpArgs {
            base_url: "https://stats.example.org/".to_string(),
            user_agent: "test".to_string(),
            timeout_secs: 5,
            request_delay_ms: 0,
        };
        let fetcher = HttpFetcher::new(&args).unwrap();
        let item = WorkItem {
            id: "5812345".to_string(),
            date: chrono::NaiveDate::from_ymd_opt(2024, 11, 4).unwrap(),
        };

        assert_eq!(
            fetcher.resource_url(&item, SubResource::TeamStats),
            "https://stats.example.org/contests/5812345/team_stats"
        );
    }
}
