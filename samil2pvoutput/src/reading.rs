use chrono::{DateTime, Local};

/// One inverter's sample at a point in time. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct InverterReading {
    /// Address the inverter was discovered at; stable across cycles.
    pub device_id: String,
    pub timestamp: DateTime<Local>,
    /// Instantaneous output power (W)
    pub output_power_w: f64,
    /// Energy produced today (kWh)
    pub energy_today_kwh: f64,
    /// Lifetime energy production (kWh)
    pub energy_total_kwh: f64,
    /// Grid voltage (V)
    pub grid_voltage_v: f64,
    /// Grid current (A)
    pub grid_current_a: f64,
    /// Grid frequency (Hz)
    pub grid_frequency_hz: f64,
    /// Internal inverter temperature (°C)
    pub inverter_temperature_c: f64,
}

/// One logical sample for the whole fleet, combined from the readings of a
/// single poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedReading {
    /// Timestamp of the latest contributing reading.
    pub timestamp: DateTime<Local>,
    /// Number of devices that contributed this cycle.
    pub count: usize,
    pub output_power_w: f64,
    pub energy_today_kwh: f64,
    pub energy_total_kwh: f64,
    pub grid_voltage_v: f64,
    pub grid_current_a: f64,
    pub grid_frequency_hz: f64,
    pub inverter_temperature_c: f64,
}
