pub mod catalog;
pub mod daily_counters;
pub mod readings;
