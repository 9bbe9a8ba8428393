use anyhow::{bail, Result};
use derive_new::new;
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::connection::signaling::CandidatePayload;

#[derive(Deserialize, Serialize, new)]
pub struct RequestBody {
    payload: CandidatePayload,
}

impl RequestBody {
    pub fn into_payload(self) -> CandidatePayload {
        self.payload
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Response {
    Created,
    NotFound,
}

impl Response {
    pub fn parse(status: StatusCode) -> Result<Self> {
        match status {
            StatusCode::CREATED => Ok(Self::Created),
            StatusCode::NOT_FOUND => Ok(Self::NotFound),
            _ => bail!("invalid response: {}", status),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Created => StatusCode::CREATED,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }
}
