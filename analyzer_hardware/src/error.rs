use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("i2c error: {0}")]
    I2c(String),
    #[error("duty {duty} out of range 0..={max}")]
    DutyOutOfRange { duty: u16, max: u16 },
    #[error("no device at module {module} channel {channel}")]
    NoDevice { module: u8, channel: u8 },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
