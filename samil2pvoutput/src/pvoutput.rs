use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;

use crate::poll::Shutdown;
use crate::reading::AggregatedReading;
use crate::retry::RetryPolicy;
use crate::upload_transport::{ApiResponse, UploadTransport};

const ADD_STATUS_URL: &str = "https://pvoutput.org/service/r2/addstatus.jsp";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("credentials rejected: {0}")]
    AuthRejected(String),
    #[error("rate limited by the service")]
    RateLimited { retry_after: Option<Duration> },
    #[error("transient upload failure: {0}")]
    Transient(String),
    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl UploadError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }
}

/// The `addstatus` parameter set for one aggregated reading. Derived fresh
/// every cycle; retries within a cycle resend the same derived record, and
/// nothing is carried over to later cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRecord {
    /// Output date, `YYYYMMDD`.
    pub date: String,
    /// Output time, `HH:MM`.
    pub time: String,
    /// Energy generated today (Wh).
    pub energy_wh: u64,
    /// Instantaneous power output (W).
    pub power_w: u64,
    /// Temperature (°C).
    pub temperature_c: f64,
    /// Voltage (V).
    pub voltage_v: f64,
}

impl UploadRecord {
    pub fn from_reading(reading: &AggregatedReading) -> Self {
        Self {
            date: reading.timestamp.format("%Y%m%d").to_string(),
            time: reading.timestamp.format("%H:%M").to_string(),
            energy_wh: (reading.energy_today_kwh * 1000.0).round().max(0.0) as u64,
            power_w: reading.output_power_w.round().max(0.0) as u64,
            temperature_c: reading.inverter_temperature_c,
            voltage_v: reading.grid_voltage_v,
        }
    }

    pub fn to_form(&self) -> Vec<(&'static str, String)> {
        vec![
            ("d", self.date.clone()),
            ("t", self.time.clone()),
            ("v1", self.energy_wh.to_string()),
            ("v2", self.power_w.to_string()),
            ("v5", format!("{:.1}", self.temperature_c)),
            ("v6", format!("{:.1}", self.voltage_v)),
        ]
    }
}

/// Uploads live status records for one PVOutput system.
pub struct PvOutput<T: UploadTransport> {
    transport: T,
    system_id: String,
    api_key: String,
}

impl<T: UploadTransport> PvOutput<T> {
    pub fn new(transport: T, system_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            system_id: system_id.into(),
            api_key: api_key.into(),
        }
    }

    /// One upload attempt.
    pub fn add_status(&mut self, record: &UploadRecord) -> Result<(), UploadError> {
        let headers = [
            ("X-Pvoutput-Apikey", self.api_key.clone()),
            ("X-Pvoutput-SystemId", self.system_id.clone()),
        ];
        let response = self
            .transport
            .post_form(ADD_STATUS_URL, &headers, &record.to_form())
            .map_err(|e| UploadError::Transient(e.to_string()))?;
        classify(response)
    }

    /// Upload with the policy's bounded retries. Non-retriable errors are
    /// returned after a single attempt; the waits between attempts honor a
    /// mandated `Retry-After` and wake early on shutdown.
    pub fn upload_with_retry(
        &mut self,
        record: &UploadRecord,
        policy: &RetryPolicy,
        shutdown: &Shutdown,
    ) -> Result<(), UploadError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let error = match self.add_status(record) {
                Ok(()) => {
                    if attempt > 1 {
                        info!("Upload succeeded on attempt {attempt}");
                    }
                    return Ok(());
                }
                Err(e) => e,
            };
            if !error.is_retriable() || attempt >= policy.max_attempts {
                return Err(error);
            }
            let delay = match &error {
                UploadError::RateLimited {
                    retry_after: Some(mandated),
                } => *mandated,
                _ => policy.delay_for(attempt),
            };
            warn!(
                "Upload attempt {attempt}/{} failed ({error}), retrying in {delay:?}",
                policy.max_attempts
            );
            if shutdown.wait(delay) {
                return Err(error);
            }
        }
    }
}

fn classify(response: ApiResponse) -> Result<(), UploadError> {
    let body = response.body.trim();
    match response.status {
        200..=299 => {
            debug!("PVOutput response: {body}");
            Ok(())
        }
        401 | 403 => Err(UploadError::AuthRejected(body.to_string())),
        429 => Err(UploadError::RateLimited {
            retry_after: response.retry_after,
        }),
        500..=599 => Err(UploadError::Transient(format!(
            "status {}: {body}",
            response.status
        ))),
        status => Err(UploadError::Rejected {
            status,
            body: body.to_string(),
        }),
    }
}
