mod delete_call_session;
mod get_call_session;
mod get_poll;
mod post_answer;
mod post_candidate;
mod put_call_session;

use std::{fmt, str::FromStr};

use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

pub use delete_call_session::Response as DeleteCallSessionResponse;

pub use get_call_session::Response as GetCallSessionResponse;
pub use get_call_session::ResponseOkBody as GetCallSessionResponseOkBody;

pub use get_poll::Response as GetPollResponse;
pub use get_poll::ResponseOkBody as GetPollResponseOkBody;

pub use post_answer::RequestBody as PostAnswerRequestBody;
pub use post_answer::Response as PostAnswerResponse;

pub use post_candidate::RequestBody as PostCandidateRequestBody;
pub use post_candidate::Response as PostCandidateResponse;

pub use put_call_session::RequestBody as PutCallSessionRequestBody;
pub use put_call_session::Response as PutCallSessionResponse;

/// Which half of the handshake a party plays. Candidate queues are
/// partitioned by role.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Offering,
    Answering,
}

impl Role {
    pub fn counterpart(self) -> Self {
        match self {
            Self::Offering => Self::Answering,
            Self::Answering => Self::Offering,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offering => "offering",
            Self::Answering => "answering",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offering" => Ok(Self::Offering),
            "answering" => Ok(Self::Answering),
            _ => bail!("unknown role: {}", s),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallSessionStatus {
    #[default]
    Pending,
    Connected,
}
