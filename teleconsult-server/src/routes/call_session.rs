mod create;
mod delete;
mod read;
mod update;

use anyhow::Result;
use lambda_http::{
    http::{Method, StatusCode},
    Body, Request, Response,
};
use once_cell::sync::Lazy;
use regex::Regex;
use teleconsult_lib::signaling_server::call_session::Role;
use tracing::debug;

use crate::database::Database;

use self::{
    create::put_call_session,
    delete::delete_call_session,
    read::{get_call_session, get_poll},
    update::{post_answer, post_candidate},
};

use super::{session_utils::decode_appointment_id, to_response, try_parse};

static SESSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([^/]+)$").unwrap());
static ANSWER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([^/]+)/answer$").unwrap());
static CANDIDATES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^/]+)/candidates/([^/]+)$").unwrap());
static POLL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([^/]+)/poll/([^/]+)$").unwrap());

fn bad_request(err: anyhow::Error) -> Response<Body> {
    debug!("{:?}", err);
    to_response(StatusCode::BAD_REQUEST, Body::Empty)
}

fn not_found(err: anyhow::Error) -> Response<Body> {
    debug!("{:?}", err);
    to_response(StatusCode::NOT_FOUND, Body::Empty)
}

pub async fn route(relative_uri: &str, req: &Request, db: &impl Database) -> Result<Response<Body>> {
    if let Some(c) = SESSION.captures(relative_uri) {
        let appointment_id = match decode_appointment_id(&c[1]) {
            Ok(appointment_id) => appointment_id,
            Err(err) => return Ok(not_found(err)),
        };
        return Ok(match *req.method() {
            Method::PUT => match try_parse(req.body()) {
                Err(err) => bad_request(err),
                Ok(body) => {
                    let res = put_call_session(db, &appointment_id, body).await?;
                    to_response(res.status_code(), Body::Empty)
                }
            },
            Method::GET => {
                let res = get_call_session(db, &appointment_id).await?;
                to_response(
                    res.status_code(),
                    res.to_body()?.map(Body::Text).unwrap_or(Body::Empty),
                )
            }
            Method::DELETE => {
                let res = delete_call_session(db, &appointment_id).await?;
                to_response(res.status_code(), Body::Empty)
            }
            _ => to_response(StatusCode::METHOD_NOT_ALLOWED, Body::Empty),
        });
    }
    if let Some(c) = ANSWER.captures(relative_uri) {
        let appointment_id = match decode_appointment_id(&c[1]) {
            Ok(appointment_id) => appointment_id,
            Err(err) => return Ok(not_found(err)),
        };
        return Ok(match *req.method() {
            Method::POST => match try_parse(req.body()) {
                Err(err) => bad_request(err),
                Ok(body) => {
                    let res = post_answer(db, &appointment_id, body).await?;
                    to_response(res.status_code(), Body::Empty)
                }
            },
            _ => to_response(StatusCode::METHOD_NOT_ALLOWED, Body::Empty),
        });
    }
    if let Some(c) = CANDIDATES.captures(relative_uri) {
        let (appointment_id, role) = match parse_session_and_role(&c[1], &c[2]) {
            Ok(x) => x,
            Err(err) => return Ok(not_found(err)),
        };
        return Ok(match *req.method() {
            Method::POST => match try_parse(req.body()) {
                Err(err) => bad_request(err),
                Ok(body) => {
                    let res = post_candidate(db, &appointment_id, role, body).await?;
                    to_response(res.status_code(), Body::Empty)
                }
            },
            _ => to_response(StatusCode::METHOD_NOT_ALLOWED, Body::Empty),
        });
    }
    if let Some(c) = POLL.captures(relative_uri) {
        let (appointment_id, role) = match parse_session_and_role(&c[1], &c[2]) {
            Ok(x) => x,
            Err(err) => return Ok(not_found(err)),
        };
        return Ok(match *req.method() {
            Method::GET => {
                let res = get_poll(db, &appointment_id, role).await?;
                let status_code = res.status_code();
                to_response(status_code, res.to_body()?.map(Body::Text).unwrap_or(Body::Empty))
            }
            _ => to_response(StatusCode::METHOD_NOT_ALLOWED, Body::Empty),
        });
    }
    Ok(to_response(StatusCode::NOT_FOUND, Body::Empty))
}

fn parse_session_and_role(appointment_id: &str, role: &str) -> Result<(String, Role)> {
    Ok((decode_appointment_id(appointment_id)?, role.parse()?))
}
