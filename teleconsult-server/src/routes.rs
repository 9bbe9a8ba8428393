mod call_session;
mod session_utils;

use std::hash::{DefaultHasher, Hash, Hasher};

use anyhow::{bail, Result};
use lambda_http::{
    http::{
        header::{AUTHORIZATION, RETRY_AFTER},
        HeaderValue, StatusCode,
    },
    Body, Request, Response,
};
use serde::Deserialize;
use tracing::{debug, info_span, trace, Instrument};

use crate::{database::Database, routes::session_utils::RETRY_AFTER_INTERVAL_SEC};

fn try_parse<'a, T>(body: &'a Body) -> anyhow::Result<T>
where
    T: Deserialize<'a>,
{
    let Body::Text(body) = body else {
        bail!("Not text");
    };
    serde_json::from_str(body.as_str()).map_err(|err| err.into())
}

fn to_response(status_code: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut res = Response::new(body.into());
    *res.status_mut() = status_code;
    res.headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(RETRY_AFTER_INTERVAL_SEC));
    res
}

/// The credential is opaque here; the gateway in front of the function
/// validates it.
fn has_bearer_credential(req: &Request) -> bool {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|x| x.to_str().ok())
        .and_then(|x| x.strip_prefix("Bearer "))
        .is_some_and(|token| !token.trim().is_empty())
}

fn ip_hash(req: &Request) -> String {
    let ip = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|x| x.to_str().ok())
        .unwrap_or_default();
    let mut s = DefaultHasher::new();
    ip.hash(&mut s);
    format!("{:016x}", s.finish())
}

pub async fn routes(req: &Request, db: &impl Database) -> Result<Response<Body>> {
    trace!("{:?}", req);

    let Some(relative_uri) = req.uri().path().strip_prefix("/call-session/") else {
        return Ok(to_response(StatusCode::NOT_FOUND, Body::Empty));
    };
    if !has_bearer_credential(req) {
        debug!("missing credential");
        return Ok(to_response(StatusCode::UNAUTHORIZED, Body::Empty));
    }
    call_session::route(relative_uri, req, db)
        .instrument(info_span!("req", ip_hash = ip_hash(req)))
        .await
}

#[cfg(test)]
mod tests {
    use lambda_http::http::{request::Builder, Method};
    use teleconsult_lib::{
        connection::signaling::{CandidatePayload, CompressedSdp},
        signaling_server::call_session::{
            CallSessionStatus, GetCallSessionResponseOkBody, GetPollResponseOkBody,
            PostAnswerRequestBody, PostCandidateRequestBody, PutCallSessionRequestBody,
        },
    };
    use tempfile::TempDir;

    use super::*;
    use crate::database::File;

    struct Fixture {
        _dir: TempDir,
        db: File,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = File::new(dir.path().join("store.json"));
            Self { _dir: dir, db }
        }

        async fn send(&self, method: Method, uri: &str, body: Option<String>) -> Response<Body> {
            let req = Builder::new()
                .method(method)
                .uri(uri)
                .header(AUTHORIZATION, "Bearer test-credential")
                .body(body.map(Body::Text).unwrap_or(Body::Empty))
                .unwrap();
            routes(&req, &self.db).await.unwrap()
        }
    }

    fn text(res: &Response<Body>) -> &str {
        match res.body() {
            Body::Text(text) => text,
            _ => panic!("no text body"),
        }
    }

    fn sdp(text: &str) -> CompressedSdp {
        CompressedSdp::compress(text).unwrap()
    }

    fn put_body(party: &str) -> Option<String> {
        let body = PutCallSessionRequestBody::new(sdp("offer"), party.to_owned());
        Some(serde_json::to_string(&body).unwrap())
    }

    fn answer_body(party: &str) -> Option<String> {
        let body = PostAnswerRequestBody::new(sdp("answer"), party.to_owned());
        Some(serde_json::to_string(&body).unwrap())
    }

    fn candidate_body(candidate: &str) -> Option<String> {
        let body = PostCandidateRequestBody::new(CandidatePayload::new(candidate));
        Some(serde_json::to_string(&body).unwrap())
    }

    #[tokio::test]
    async fn requests_without_credential_are_rejected() {
        let fixture = Fixture::new();
        let req = Builder::new()
            .method(Method::GET)
            .uri("/call-session/A-100")
            .body(Body::Empty)
            .unwrap();
        let res = routes(&req, &fixture.db).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn second_create_conflicts() {
        let f = Fixture::new();
        let uri = "/call-session/A-100";
        let res = f.send(Method::PUT, uri, put_body("doctor")).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let res = f.send(Method::PUT, uri, put_body("patient")).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = f.send(Method::GET, uri, None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: GetCallSessionResponseOkBody = serde_json::from_str(text(&res)).unwrap();
        assert_eq!(body.offering_party_id(), "doctor");
        assert!(body.answer().is_none());
    }

    #[tokio::test]
    async fn answer_rules() {
        let f = Fixture::new();
        let uri = "/call-session/A-100";
        let answer_uri = "/call-session/A-100/answer";
        let res = f.send(Method::POST, answer_uri, answer_body("patient")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        f.send(Method::PUT, uri, put_body("doctor")).await;
        let res = f.send(Method::POST, answer_uri, answer_body("doctor")).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        let res = f.send(Method::POST, answer_uri, answer_body("patient")).await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = f.send(Method::POST, answer_uri, answer_body("patient")).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = f.send(Method::GET, uri, None).await;
        let body: GetCallSessionResponseOkBody = serde_json::from_str(text(&res)).unwrap();
        assert_eq!(body.answer().as_ref(), Some(&sdp("answer")));
        assert_eq!(body.status(), CallSessionStatus::Connected);
    }

    #[tokio::test]
    async fn poll_returns_counterpart_candidates_and_answer_for_offerer_only() {
        let f = Fixture::new();
        f.send(Method::PUT, "/call-session/A-100", put_body("doctor"))
            .await;
        for (role, candidate) in [("offering", "o1"), ("answering", "a1"), ("answering", "a2")] {
            let uri = format!("/call-session/A-100/candidates/{}", role);
            let res = f.send(Method::POST, &uri, candidate_body(candidate)).await;
            assert_eq!(res.status(), StatusCode::CREATED);
        }
        f.send(
            Method::POST,
            "/call-session/A-100/answer",
            answer_body("patient"),
        )
        .await;

        let res = f
            .send(Method::GET, "/call-session/A-100/poll/offering", None)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[RETRY_AFTER], "3");
        let (answer, candidates) = serde_json::from_str::<GetPollResponseOkBody>(text(&res))
            .unwrap()
            .into_inner();
        assert_eq!(answer, Some(sdp("answer")));
        let candidates: Vec<_> = candidates.into_iter().map(|x| x.candidate).collect();
        assert_eq!(candidates, vec!["a1", "a2"]);

        let res = f
            .send(Method::GET, "/call-session/A-100/poll/answering", None)
            .await;
        let (answer, candidates) = serde_json::from_str::<GetPollResponseOkBody>(text(&res))
            .unwrap()
            .into_inner();
        assert!(answer.is_none());
        assert_eq!(candidates, vec![CandidatePayload::new("o1")]);
    }

    #[tokio::test]
    async fn unknown_role_or_session_is_not_found() {
        let f = Fixture::new();
        let res = f
            .send(Method::GET, "/call-session/A-100/poll/offering", None)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let res = f
            .send(Method::POST, "/call-session/A-100/candidates/offering", candidate_body("x"))
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        f.send(Method::PUT, "/call-session/A-100", put_body("doctor"))
            .await;
        let res = f
            .send(Method::GET, "/call-session/A-100/poll/spectator", None)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_removes_everything_and_is_idempotent() {
        let f = Fixture::new();
        let uri = "/call-session/A-100";
        f.send(Method::PUT, uri, put_body("doctor")).await;
        f.send(
            Method::POST,
            "/call-session/A-100/candidates/offering",
            candidate_body("o1"),
        )
        .await;

        let res = f.send(Method::DELETE, uri, None).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        let res = f.send(Method::GET, uri, None).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let res = f.send(Method::DELETE, uri, None).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let res = f.send(Method::PUT, uri, put_body("patient")).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let res = f
            .send(Method::GET, "/call-session/A-100/poll/answering", None)
            .await;
        let body: GetPollResponseOkBody = serde_json::from_str(text(&res)).unwrap();
        assert!(body.candidates().is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let f = Fixture::new();
        let res = f
            .send(Method::PUT, "/call-session/A-100", Some("{}".to_owned()))
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let res = f
            .send(Method::PATCH, "/call-session/A-100", None)
            .await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
