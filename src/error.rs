use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanBusError {
    // Caller input errors
    InvalidArgument,
    InvalidLength,

    // Fixed-capacity tables
    CapacityExceeded,
    Duplicate,
    NotFound,

    // Driver rejected a frame, carries the controller status code
    HardwareFailure(u32),
}

impl fmt::Display for CanBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanBusError::InvalidArgument => write!(f, "Invalid argument"),
            CanBusError::InvalidLength => write!(f, "Not a valid CAN FD payload length"),
            CanBusError::CapacityExceeded => write!(f, "Capacity exceeded"),
            CanBusError::Duplicate => write!(f, "Subscription already registered"),
            CanBusError::NotFound => write!(f, "Subscription not found"),
            CanBusError::HardwareFailure(code) => {
                write!(f, "CAN controller rejected frame (status {})", code)
            }
        }
    }
}

impl Error for CanBusError {}

pub type Result<T> = std::result::Result<T, CanBusError>;
