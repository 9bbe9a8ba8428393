use anyhow::{bail, Result};
use derive_new::new;
use getset::Getters;
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::connection::signaling::CompressedSdp;

use super::CallSessionStatus;

#[derive(Clone, Debug, Deserialize, Serialize, Getters, PartialEq, new)]
pub struct ResponseOkBody {
    #[get = "pub"]
    offer: CompressedSdp,
    #[get = "pub"]
    answer: Option<CompressedSdp>,
    #[get = "pub"]
    offering_party_id: String,
    status: CallSessionStatus,
}

impl ResponseOkBody {
    pub fn status(&self) -> CallSessionStatus {
        self.status
    }

    pub fn into_offer(self) -> CompressedSdp {
        self.offer
    }
}

#[derive(Debug)]
pub enum Response {
    Ok(ResponseOkBody),
    NotFound,
}

impl Response {
    pub fn parse(status: StatusCode, text: Option<&str>) -> Result<Self> {
        match (status, text) {
            (StatusCode::OK, Some(text)) => {
                if let Ok(body) = serde_json::from_str::<ResponseOkBody>(text) {
                    return Ok(Self::Ok(body));
                }
            }
            (StatusCode::NOT_FOUND, _) => return Ok(Self::NotFound),
            _ => {}
        }
        bail!("invalid response: {}", status)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Ok(_) => StatusCode::OK,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }

    pub fn to_body(&self) -> Result<Option<String>> {
        Ok(match self {
            Self::Ok(body) => Some(serde_json::to_string(body)?),
            Self::NotFound => None,
        })
    }
}
