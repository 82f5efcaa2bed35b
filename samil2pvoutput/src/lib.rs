pub mod aggregate;
pub mod discovery;
pub mod inverter;
pub mod poll;
pub mod protocol;
pub mod pvoutput;
pub mod reading;
pub mod retry;
pub mod upload_transport;
