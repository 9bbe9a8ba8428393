use anyhow::{bail, Result};
use derive_new::new;
use getset::Getters;
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::connection::signaling::CompressedSdp;

#[derive(Deserialize, Serialize, Getters, new)]
pub struct RequestBody {
    #[get = "pub"]
    answer: CompressedSdp,
    #[get = "pub"]
    answering_party_id: String,
}

impl RequestBody {
    pub fn into_inner(self) -> (CompressedSdp, String) {
        (self.answer, self.answering_party_id)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Response {
    Ok,
    NotFound,
    /// The answering party started the session itself.
    Forbidden,
    /// Someone has answered already.
    Conflict,
}

impl Response {
    pub fn parse(status: StatusCode) -> Result<Self> {
        match status {
            StatusCode::OK => Ok(Self::Ok),
            StatusCode::NOT_FOUND => Ok(Self::NotFound),
            StatusCode::FORBIDDEN => Ok(Self::Forbidden),
            StatusCode::CONFLICT => Ok(Self::Conflict),
            _ => bail!("invalid response: {}", status),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Ok => StatusCode::OK,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Conflict => StatusCode::CONFLICT,
        }
    }
}
