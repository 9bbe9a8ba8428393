use anyhow::{bail, Result};
use derive_new::new;
use getset::Getters;
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::connection::signaling::CompressedSdp;

#[derive(Deserialize, Serialize, Getters, new)]
pub struct RequestBody {
    #[get = "pub"]
    offer: CompressedSdp,
    #[get = "pub"]
    offering_party_id: String,
}

impl RequestBody {
    pub fn into_inner(self) -> (CompressedSdp, String) {
        (self.offer, self.offering_party_id)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Response {
    Created,
    Conflict,
}

impl Response {
    pub fn parse(status: StatusCode) -> Result<Self> {
        match status {
            StatusCode::CREATED => Ok(Self::Created),
            StatusCode::CONFLICT => Ok(Self::Conflict),
            _ => bail!("invalid response: {}", status),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Created => StatusCode::CREATED,
            Self::Conflict => StatusCode::CONFLICT,
        }
    }
}
