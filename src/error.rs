use std::{io,time,num};

use thiserror::Error;


pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error,Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    IO(#[from] io::Error),
    #[error("CSV error: {0}")]
    CSV(#[from] csv::Error),
    #[error("JSON error: {0}")]
    JSON(#[from] serde_json::Error),
    #[error("Request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),
    #[error("System Time error: {0}")]
    SystemTime(#[from] time::SystemTimeError),
    #[error("Float parse error: {0}")]
    ParseFloat(#[from] num::ParseFloatError),
    #[error("Date parse error: {0}")]
    ParseDate(#[from] chrono::format::ParseError),
    #[error("Length mismatch for {what}: {left} != {right}")]
    LengthMismatch { what: &'static str, left: usize, right: usize },
    #[error("Invalid breakpoint list: {0}")]
    BreakpointParse(String),
    #[error("Spline fit failed: {0}")]
    SplineFit(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid date: {0}")]
    InvalidDate(String),
    #[error("Missing entity: {0}")]
    MissingEntity(String),
    #[error("No data!")]
    MissingData,
}
