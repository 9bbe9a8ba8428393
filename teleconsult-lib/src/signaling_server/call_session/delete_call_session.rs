use anyhow::{bail, Result};
use http::StatusCode;

/// Deleting a session that does not exist is not an error.
#[derive(Debug, PartialEq, Eq)]
pub enum Response {
    NoContent,
}

impl Response {
    pub fn parse(status: StatusCode) -> Result<Self> {
        match status {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(Self::NoContent),
            _ => bail!("invalid response: {}", status),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoContent => StatusCode::NO_CONTENT,
        }
    }
}
