use std::{env, time::Duration};

use anyhow::{bail, Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::{
    error::SdkError,
    operation::batch_write_item::BatchWriteItemOutput,
    types::{AttributeValue, DeleteRequest, WriteRequest},
};
use serde::{Deserialize, Serialize};
use serde_dynamo::{from_item, from_items, to_item};
use teleconsult_lib::{
    connection::signaling::CompressedSdp,
    signaling_server::call_session::{CallSessionStatus, Role},
};

use tokio::time::sleep;
use tracing::warn;

use super::{CallSession, CallSessionTables, CandidateRecord, CandidateTables, Database, PutError};

const BATCH_WRITE_LIMIT: usize = 25;
const BATCH_WRITE_ATTEMPTS: u32 = 5;

fn unprocessed_requests(output: BatchWriteItemOutput, table_name: &str) -> Vec<WriteRequest> {
    output
        .unprocessed_items
        .and_then(|mut items| items.remove(table_name))
        .unwrap_or_default()
}

pub struct DynamoDB {
    client: aws_sdk_dynamodb::Client,
    table_name_call_session: String,
    table_name_candidate: String,
}

impl DynamoDB {
    pub async fn new() -> Result<Self> {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let env = env::var("ENV").context("ENV is not set")?;
        Ok(Self {
            client: aws_sdk_dynamodb::Client::new(&config),
            table_name_call_session: format!("{}.CallSession", env),
            table_name_candidate: format!("{}.Candidate", env),
        })
    }

    /// Resends whatever DynamoDB reports as unprocessed, with a growing pause.
    async fn batch_delete_candidates(&self, mut requests: Vec<WriteRequest>) -> Result<()> {
        for attempt in 0..BATCH_WRITE_ATTEMPTS {
            if attempt > 0 {
                sleep(Duration::from_millis(50 << attempt)).await;
            }
            let output = self
                .client
                .batch_write_item()
                .request_items(&self.table_name_candidate, requests)
                .send()
                .await?;
            requests = unprocessed_requests(output, &self.table_name_candidate);
            if requests.is_empty() {
                return Ok(());
            }
            warn!("{} candidate deletions unprocessed", requests.len());
        }
        bail!("{} candidate deletions left unprocessed", requests.len())
    }

    async fn put_item(&self, table_name: &str, item: impl Serialize) -> Result<(), PutError> {
        let item = to_item(item).map_err(|err| PutError::Unknown(err.into()))?;
        let result = self
            .client
            .put_item()
            .table_name(table_name)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(#appointment_id)")
            .expression_attribute_names("#appointment_id", "appointment_id")
            .send()
            .await;
        if let Err(err) = result {
            if let SdkError::ServiceError(service_error) = &err {
                if service_error.err().is_conditional_check_failed_exception() {
                    return Err(PutError::Conflict);
                }
            }
            return Err(PutError::Unknown(err.into()));
        }
        Ok(())
    }

    async fn query_items<'a, T>(
        &self,
        table_name: &str,
        appointment_id: String,
        sort_key_prefix: Option<String>,
    ) -> Result<Vec<T>>
    where
        T: Deserialize<'a>,
    {
        let mut builder = self
            .client
            .query()
            .table_name(table_name)
            .consistent_read(true)
            .expression_attribute_names("#appointment_id", "appointment_id")
            .expression_attribute_values(":appointment_id", AttributeValue::S(appointment_id));
        builder = if let Some(prefix) = sort_key_prefix {
            builder
                .key_condition_expression(
                    "#appointment_id = :appointment_id AND begins_with(#sort_key, :prefix)",
                )
                .expression_attribute_names("#sort_key", "sort_key")
                .expression_attribute_values(":prefix", AttributeValue::S(prefix))
        } else {
            builder.key_condition_expression("#appointment_id = :appointment_id")
        };
        let mut items = Vec::new();
        let mut exclusive_start_key = None;
        loop {
            let output = builder
                .clone()
                .set_exclusive_start_key(exclusive_start_key)
                .send()
                .await?;
            items.extend(output.items().iter().cloned());
            exclusive_start_key = output.last_evaluated_key().cloned();
            if exclusive_start_key.is_none() {
                break;
            }
        }
        Ok(from_items(items)?)
    }
}

impl CallSessionTables for DynamoDB {
    async fn put_call_session(&self, session: CallSession) -> Result<(), PutError> {
        self.put_item(&self.table_name_call_session, session).await
    }

    async fn find_call_session(&self, appointment_id: String) -> Result<Option<CallSession>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name_call_session)
            .key("appointment_id", AttributeValue::S(appointment_id))
            .consistent_read(true)
            .send()
            .await?;
        let Some(item) = output.item() else {
            return Ok(None);
        };
        Ok(Some(from_item(item.to_owned())?))
    }

    async fn put_answer(
        &self,
        appointment_id: String,
        answer: CompressedSdp,
        ttl_sec: u64,
    ) -> Result<(), PutError> {
        let to_attr = |status: CallSessionStatus| {
            serde_dynamo::to_attribute_value(status).map_err(|err| PutError::Unknown(err.into()))
        };
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name_call_session)
            .key("appointment_id", AttributeValue::S(appointment_id))
            .condition_expression("attribute_exists(#appointment_id) AND #status = :pending")
            .update_expression("SET #answer = :answer, #status = :connected, #ttl_sec = :ttl_sec")
            .expression_attribute_names("#appointment_id", "appointment_id")
            .expression_attribute_names("#answer", "answer")
            .expression_attribute_names("#status", "status")
            .expression_attribute_names("#ttl_sec", "ttl_sec")
            .expression_attribute_values(":answer", AttributeValue::S(answer.into_inner()))
            .expression_attribute_values(":pending", to_attr(CallSessionStatus::Pending)?)
            .expression_attribute_values(":connected", to_attr(CallSessionStatus::Connected)?)
            .expression_attribute_values(":ttl_sec", AttributeValue::N(ttl_sec.to_string()))
            .send()
            .await;
        if let Err(err) = result {
            if let SdkError::ServiceError(service_error) = &err {
                if service_error.err().is_conditional_check_failed_exception() {
                    return Err(PutError::Conflict);
                }
            }
            return Err(PutError::Unknown(err.into()));
        }
        Ok(())
    }

    async fn keep_call_session(&self, appointment_id: String, ttl_sec: u64) -> Result<bool> {
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name_call_session)
            .key("appointment_id", AttributeValue::S(appointment_id))
            .condition_expression("attribute_exists(#appointment_id)")
            .update_expression("SET #ttl_sec = :ttl_sec")
            .expression_attribute_names("#appointment_id", "appointment_id")
            .expression_attribute_names("#ttl_sec", "ttl_sec")
            .expression_attribute_values(":ttl_sec", AttributeValue::N(ttl_sec.to_string()))
            .send()
            .await;
        if let Err(err) = result {
            if let SdkError::ServiceError(service_error) = &err {
                if service_error.err().is_conditional_check_failed_exception() {
                    return Ok(false);
                }
            }
            return Err(err.into());
        }
        Ok(true)
    }

    async fn remove_call_session(&self, appointment_id: String) -> Result<bool> {
        let output = self
            .client
            .delete_item()
            .table_name(&self.table_name_call_session)
            .key("appointment_id", AttributeValue::S(appointment_id))
            .return_values(aws_sdk_dynamodb::types::ReturnValue::AllOld)
            .send()
            .await?;
        Ok(output.attributes().is_some())
    }
}

impl CandidateTables for DynamoDB {
    async fn append_candidate(&self, candidate: CandidateRecord) -> Result<()> {
        let item = to_item(candidate)?;
        self.client
            .put_item()
            .table_name(&self.table_name_candidate)
            .set_item(Some(item))
            .send()
            .await?;
        Ok(())
    }

    async fn find_candidates(
        &self,
        appointment_id: String,
        role: Role,
    ) -> Result<Vec<CandidateRecord>> {
        let prefix = format!("{}#", role);
        self.query_items(&self.table_name_candidate, appointment_id, Some(prefix))
            .await
    }

    async fn remove_candidates(&self, appointment_id: String) -> Result<()> {
        let candidates: Vec<CandidateRecord> = self
            .query_items(&self.table_name_candidate, appointment_id, None)
            .await?;
        for chunk in candidates.chunks(BATCH_WRITE_LIMIT) {
            let requests = chunk
                .iter()
                .map(|candidate| {
                    let delete = DeleteRequest::builder()
                        .key(
                            "appointment_id",
                            AttributeValue::S(candidate.appointment_id().clone()),
                        )
                        .key("sort_key", AttributeValue::S(candidate.sort_key().clone()))
                        .build()?;
                    Ok(WriteRequest::builder().delete_request(delete).build())
                })
                .collect::<Result<Vec<_>>>()?;
            self.batch_delete_candidates(requests).await?;
        }
        Ok(())
    }
}

impl Database for DynamoDB {}

#[cfg(test)]
mod tests {
    use super::*;

    fn delete_request(sort_key: &str) -> WriteRequest {
        let delete = DeleteRequest::builder()
            .key("appointment_id", AttributeValue::S("A-100".to_owned()))
            .key("sort_key", AttributeValue::S(sort_key.to_owned()))
            .build()
            .unwrap();
        WriteRequest::builder().delete_request(delete).build()
    }

    #[test]
    fn unprocessed_requests_are_taken_for_the_candidate_table() {
        let output = BatchWriteItemOutput::builder()
            .unprocessed_items("dev.Candidate", vec![delete_request("offering#1")])
            .unprocessed_items("dev.CallSession", vec![delete_request("x")])
            .build();
        let left = unprocessed_requests(output, "dev.Candidate");
        assert_eq!(left, vec![delete_request("offering#1")]);

        let output = BatchWriteItemOutput::builder().build();
        assert!(unprocessed_requests(output, "dev.Candidate").is_empty());
    }
}
