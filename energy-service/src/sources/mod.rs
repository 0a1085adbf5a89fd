pub mod channel;
pub mod csv_replay;

pub use channel::{ChannelSource, ReadingSender};
pub use csv_replay::CsvReplaySource;
