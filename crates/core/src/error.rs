use thiserror::Error;

#[derive(Error, Debug)]
pub enum HopcraftError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, HopcraftError>;
