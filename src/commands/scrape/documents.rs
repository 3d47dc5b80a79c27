use std::collections::BTreeMap;

use anyhow::Result;

use crate::model::WorkItem;
use crate::tabular::Table;

/// Named document fetched once per game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubResource {
    BoxScore,
    TeamStats,
    Officials,
}

impl SubResource {
    pub const ALL: [SubResource; 3] = [
        SubResource::BoxScore,
        SubResource::TeamStats,
        SubResource::Officials,
    ];

    pub fn key(self) -> &'static str {
        match self {
            SubResource::BoxScore => "box_score",
            SubResource::TeamStats => "team_stats",
            SubResource::Officials => "officials",
        }
    }
}

/// Every table fetched for one work item, keyed by sub-resource and addressed
/// by position within the page. Missing keys and short lists are normal.
#[derive(Debug, Clone, Default)]
pub struct RawDocumentSet {
    documents: BTreeMap<SubResource, Vec<Table>>,
}

impl RawDocumentSet {
    pub fn insert(&mut self, resource: SubResource, tables: Vec<Table>) {
        self.documents.insert(resource, tables);
    }

    #[cfg(test)]
    pub fn with(mut self, resource: SubResource, tables: Vec<Table>) -> Self {
        self.insert(resource, tables);
        self
    }

    pub fn table(&self, resource: SubResource, index: usize) -> Option<&Table> {
        self.documents
            .get(&resource)
            .and_then(|tables| tables.get(index))
    }
}

/// Source of the sub-resources for a work item. Implementations return only
/// once every sub-resource has been gathered; any error fails the whole item.
pub trait ResourceFetcher {
    fn fetch(&self, item: &WorkItem) -> Result<RawDocumentSet>;
}
