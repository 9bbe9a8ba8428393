use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Response};
use teleconsult_lib::{
    connection::signaling::{CandidatePayload, CompressedSdp},
    signaling_server::call_session::{
        DeleteCallSessionResponse, GetCallSessionResponse, GetPollResponse, PostAnswerRequestBody,
        PostAnswerResponse, PostCandidateRequestBody, PostCandidateResponse,
        PutCallSessionRequestBody, PutCallSessionResponse, Role,
    },
};
use tracing::{debug, info};

use super::{CallSession, CreateSessionError, PullResult, RecordAnswerError, SignalingStore};

fn retry_after(res: &Response) -> Option<u32> {
    res.headers()
        .get(RETRY_AFTER)
        .and_then(|x| x.to_str().ok())
        .and_then(|x| x.parse::<u32>().ok())
}

/// The HTTP signaling server. Every request carries the caller's bearer
/// credential.
pub struct SignalingServerStore {
    client: reqwest::Client,
    origin: String,
    credential: String,
}

impl SignalingServerStore {
    pub fn new(origin: String, credential: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            origin: origin.trim_end_matches('/').to_owned(),
            credential,
        }
    }

    fn url(&self, appointment_id: &str, rest: &str) -> String {
        format!(
            "{}/call-session/{}{}",
            self.origin,
            urlencoding::encode(appointment_id),
            rest
        )
    }

    async fn put_call_session(
        &self,
        appointment_id: &str,
        body: PutCallSessionRequestBody,
    ) -> Result<PutCallSessionResponse> {
        let url = self.url(appointment_id, "");
        info!("PUT {}", url);
        let res = self
            .client
            .put(url)
            .bearer_auth(&self.credential)
            .json(&body)
            .send()
            .await?;
        info!("{:?}", res.status());
        PutCallSessionResponse::parse(res.status())
    }

    async fn post_answer(
        &self,
        appointment_id: &str,
        body: PostAnswerRequestBody,
    ) -> Result<PostAnswerResponse> {
        let url = self.url(appointment_id, "/answer");
        info!("POST {}", url);
        let res = self
            .client
            .post(url)
            .bearer_auth(&self.credential)
            .json(&body)
            .send()
            .await?;
        info!("{:?}", res.status());
        PostAnswerResponse::parse(res.status())
    }
}

#[async_trait]
impl SignalingStore for SignalingServerStore {
    async fn create_session(
        &self,
        appointment_id: &str,
        offer: CompressedSdp,
        offering_party_id: &str,
    ) -> Result<(), CreateSessionError> {
        let body = PutCallSessionRequestBody::new(offer, offering_party_id.to_owned());
        match self.put_call_session(appointment_id, body).await? {
            PutCallSessionResponse::Created => Ok(()),
            PutCallSessionResponse::Conflict => Err(CreateSessionError::AlreadyExists),
        }
    }

    async fn read_session(&self, appointment_id: &str) -> Result<Option<CallSession>> {
        let url = self.url(appointment_id, "");
        info!("GET {}", url);
        let res = self
            .client
            .get(url)
            .bearer_auth(&self.credential)
            .send()
            .await?;
        let status = res.status();
        info!("{:?}", status);
        let text = res.text().await.ok();
        match GetCallSessionResponse::parse(status, text.as_deref())? {
            GetCallSessionResponse::Ok(body) => Ok(Some(body)),
            GetCallSessionResponse::NotFound => Ok(None),
        }
    }

    async fn record_answer(
        &self,
        appointment_id: &str,
        answer: CompressedSdp,
        answering_party_id: &str,
    ) -> Result<(), RecordAnswerError> {
        let body = PostAnswerRequestBody::new(answer, answering_party_id.to_owned());
        match self.post_answer(appointment_id, body).await? {
            PostAnswerResponse::Ok => Ok(()),
            PostAnswerResponse::NotFound => Err(RecordAnswerError::NotFound),
            PostAnswerResponse::Conflict => Err(RecordAnswerError::AlreadyAnswered),
            PostAnswerResponse::Forbidden => Err(RecordAnswerError::SameParty),
        }
    }

    async fn append_candidate(
        &self,
        appointment_id: &str,
        role: Role,
        payload: CandidatePayload,
    ) -> Result<()> {
        let url = self.url(appointment_id, &format!("/candidates/{}", role));
        debug!("POST {}", url);
        let res = self
            .client
            .post(url)
            .bearer_auth(&self.credential)
            .json(&PostCandidateRequestBody::new(payload))
            .send()
            .await?;
        match PostCandidateResponse::parse(res.status())? {
            PostCandidateResponse::Created => Ok(()),
            PostCandidateResponse::NotFound => bail!("call session not found"),
        }
    }

    async fn pull(&self, appointment_id: &str, role: Role) -> Result<PullResult> {
        let url = self.url(appointment_id, &format!("/poll/{}", role));
        debug!("GET {}", url);
        let res = self
            .client
            .get(url)
            .bearer_auth(&self.credential)
            .send()
            .await?;
        let status = res.status();
        let retry_after = retry_after(&res);
        let text = res.text().await.ok();
        match GetPollResponse::parse(status, retry_after, text.as_deref())? {
            GetPollResponse::Ok { retry_after, body } => {
                let (answer, candidates) = body.into_inner();
                Ok(PullResult {
                    answer,
                    candidates,
                    retry_after: Some(Duration::from_secs(retry_after as u64)),
                })
            }
            GetPollResponse::NotFound => bail!("call session not found"),
        }
    }

    async fn delete_session(&self, appointment_id: &str) -> Result<()> {
        let url = self.url(appointment_id, "");
        info!("DELETE {}", url);
        let res = self
            .client
            .delete(url)
            .bearer_auth(&self.credential)
            .send()
            .await?;
        info!("{:?}", res.status());
        match DeleteCallSessionResponse::parse(res.status())? {
            DeleteCallSessionResponse::NoContent => Ok(()),
        }
    }
}
