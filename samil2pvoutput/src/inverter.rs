use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::time::Duration;

use chrono::Local;
use log::debug;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;

use crate::poll::ReadingSource;
use crate::protocol::{self, FrameError, ProductionData};
use crate::reading::InverterReading;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("inverter unreachable: {0}")]
    Unreachable(#[source] io::Error),
    #[error("request timed out")]
    Timeout,
    #[error("malformed response: {0}")]
    Malformed(#[from] FrameError),
}

/// Queries one Samil inverter over TCP. Every fetch opens a fresh
/// connection and closes it again; nothing is retained between calls.
pub struct SamilInverter {
    addr: SocketAddr,
    bind_ip: Option<IpAddr>,
    timeout: Duration,
}

impl SamilInverter {
    pub fn new(addr: SocketAddr, bind_ip: Option<IpAddr>, timeout: Duration) -> Self {
        Self {
            addr,
            bind_ip,
            timeout,
        }
    }

    /// Connect with a bounded wait, optionally binding the socket to the
    /// configured local interface first.
    fn connect(&self) -> Result<TcpStream, DeviceError> {
        let socket = Socket::new(Domain::for_address(self.addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(io_to_device_error)?;
        if let Some(ip) = self.bind_ip {
            socket
                .bind(&SocketAddr::new(ip, 0).into())
                .map_err(io_to_device_error)?;
        }
        socket
            .connect_timeout(&self.addr.into(), self.timeout)
            .map_err(io_to_device_error)?;
        socket
            .set_read_timeout(Some(self.timeout))
            .map_err(io_to_device_error)?;
        socket
            .set_write_timeout(Some(self.timeout))
            .map_err(io_to_device_error)?;
        Ok(socket.into())
    }

    /// Query the inverter for its current production values.
    pub fn fetch_reading(&self) -> Result<InverterReading, DeviceError> {
        let mut stream = self.connect()?;
        stream
            .write_all(&protocol::DATA_REQUEST)
            .map_err(io_to_device_error)?;

        let mut buf = [0u8; 1024];
        let read = stream.read(&mut buf).map_err(io_to_device_error)?;
        let payload = protocol::parse_frame(&buf[..read])?;
        let data = ProductionData::decode(payload)?;
        debug!("{}: {data:?}", self.addr);

        Ok(InverterReading {
            device_id: self.addr.ip().to_string(),
            timestamp: Local::now(),
            output_power_w: data.output_power_w,
            energy_today_kwh: data.energy_today_kwh,
            energy_total_kwh: data.energy_total_kwh,
            grid_voltage_v: data.grid_voltage_v,
            grid_current_a: data.grid_current_a,
            grid_frequency_hz: data.grid_frequency_hz,
            inverter_temperature_c: data.inverter_temperature_c,
        })
    }
}

impl ReadingSource for SamilInverter {
    fn device_id(&self) -> String {
        self.addr.ip().to_string()
    }

    fn fetch(&self) -> Result<InverterReading, DeviceError> {
        self.fetch_reading()
    }
}

fn io_to_device_error(error: io::Error) -> DeviceError {
    match error.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => DeviceError::Timeout,
        _ => DeviceError::Unreachable(error),
    }
}
