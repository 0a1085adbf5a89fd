pub mod db;
pub mod domain;

pub use domain::{DistrictProfile, EnergySource, Reading, Sensor, SensorStatus};
