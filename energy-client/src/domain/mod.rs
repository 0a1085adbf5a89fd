mod reading;
mod sensor;

pub use reading::Reading;
pub use sensor::{DistrictProfile, EnergySource, Sensor, SensorStatus, UnknownEnergySource};
