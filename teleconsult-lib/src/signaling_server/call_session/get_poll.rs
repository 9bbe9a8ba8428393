use anyhow::{anyhow, bail, Result};
use derive_new::new;
use getset::Getters;
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::connection::signaling::{CandidatePayload, CompressedSdp};

#[derive(Debug, Default, Deserialize, Serialize, Getters, new)]
pub struct ResponseOkBody {
    /// Only ever present for the offering party.
    #[get = "pub"]
    answer: Option<CompressedSdp>,
    /// Every candidate of the counterpart, oldest first.
    #[get = "pub"]
    candidates: Vec<CandidatePayload>,
}

impl ResponseOkBody {
    pub fn into_inner(self) -> (Option<CompressedSdp>, Vec<CandidatePayload>) {
        (self.answer, self.candidates)
    }
}

#[derive(Debug)]
pub enum Response {
    Ok {
        retry_after: u32,
        body: ResponseOkBody,
    },
    NotFound,
}

impl Response {
    pub fn ok(retry_after: u32, body: ResponseOkBody) -> Self {
        Self::Ok { retry_after, body }
    }

    pub fn parse(status: StatusCode, retry_after: Option<u32>, text: Option<&str>) -> Result<Self> {
        match status {
            StatusCode::OK => Ok(Self::Ok {
                retry_after: retry_after.ok_or_else(|| anyhow!("invalid response"))?,
                body: serde_json::from_str(text.ok_or_else(|| anyhow!("invalid response"))?)?,
            }),
            StatusCode::NOT_FOUND => Ok(Self::NotFound),
            _ => bail!("invalid response: {}", status),
        }
    }

    pub fn retry_after(&self) -> Option<u32> {
        match self {
            Self::Ok { retry_after, .. } => Some(*retry_after),
            Self::NotFound => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Ok { .. } => StatusCode::OK,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }

    pub fn to_body(&self) -> Result<Option<String>> {
        Ok(match self {
            Self::Ok { body, .. } => Some(serde_json::to_string(body)?),
            Self::NotFound => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_requires_retry_after() {
        let text = r#"{"answer":null,"candidates":[{"candidate":"candidate:1"}]}"#;
        assert!(Response::parse(StatusCode::OK, None, Some(text)).is_err());

        let res = Response::parse(StatusCode::OK, Some(3), Some(text)).unwrap();
        assert_eq!(res.retry_after(), Some(3));
        let Response::Ok { body, .. } = res else {
            panic!("unexpected response");
        };
        let (answer, candidates) = body.into_inner();
        assert!(answer.is_none());
        assert_eq!(candidates, vec![CandidatePayload::new("candidate:1")]);
    }

    #[test]
    fn unknown_status_is_an_error() {
        assert!(matches!(
            Response::parse(StatusCode::NOT_FOUND, None, None),
            Ok(Response::NotFound)
        ));
        assert!(Response::parse(StatusCode::UNAUTHORIZED, None, None).is_err());
    }
}
