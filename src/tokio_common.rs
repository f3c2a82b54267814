//! Error type shared by the `tokio-modbus` based transport and the serial
//! settings of a direct RS-485 link.
use crate::protocol as proto;

/// Represents all possible errors that can occur during Modbus communication.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wraps `proto::Error`.
    #[error(transparent)]
    ProtocolError(#[from] proto::Error),

    /// The device answered with a Modbus exception.
    #[error(transparent)]
    TokioExceptionError(#[from] tokio_modbus::ExceptionCode),

    /// Wraps `tokio_modbus::Error`.
    #[error(transparent)]
    TokioError(#[from] tokio_modbus::Error),

    /// The response carried a different number of registers than requested.
    #[error("expected {expected} register(s) in the response, got {got}")]
    UnexpectedResponseLength { expected: usize, got: usize },

    /// The connection to the endpoint could not be established.
    #[error("cannot connect to {endpoint}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Whether the failure happened on the wire and may succeed when the
    /// request is sent again. Device exceptions are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TokioError(_) | Error::UnexpectedResponseLength { .. } | Error::Connect { .. }
        )
    }

    /// The exception code if the device rejected the request.
    pub fn exception(&self) -> Option<tokio_modbus::ExceptionCode> {
        match self {
            Error::TokioExceptionError(code) => Some(*code),
            _ => None,
        }
    }
}

/// The result type for tokio operations.
pub type Result<T> = std::result::Result<T, crate::tokio_common::Error>;

#[cfg(feature = "tokio-rtu-sync")]
pub use serial::*;

#[cfg(feature = "tokio-rtu-sync")]
mod serial {
    /// The parity used for serial communication.
    pub const PARITY: &tokio_serial::Parity = &tokio_serial::Parity::None;
    /// The number of stop bits used for serial communication.
    pub const STOP_BITS: &tokio_serial::StopBits = &tokio_serial::StopBits::One;
    /// The number of data bits used for serial communication.
    pub const DATA_BITS: &tokio_serial::DataBits = &tokio_serial::DataBits::Eight;

    /// Creates a `tokio_serial::SerialPortBuilder` for the heat pump's RS-485
    /// port (8N1, no flow control).
    ///
    /// # Arguments
    ///
    /// * `device` - The path to the serial port device (e.g., `/dev/ttyUSB0`).
    /// * `baud_rate` - The baud rate for the serial communication.
    pub fn serial_port_builder(device: &str, baud_rate: u32) -> tokio_serial::SerialPortBuilder {
        tokio_serial::new(device, baud_rate)
            .parity(*PARITY)
            .stop_bits(*STOP_BITS)
            .data_bits(*DATA_BITS)
            .flow_control(tokio_serial::FlowControl::None)
    }
}
