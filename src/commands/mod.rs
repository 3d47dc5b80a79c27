pub mod ids;
pub mod merge;
pub mod referees;
pub mod scrape;
pub mod status;
pub mod travel;
