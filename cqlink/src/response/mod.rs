//! Responses of the database, as handed to users and as used internally.

pub mod query_result;
pub mod unbuffered;

use std::collections::HashMap;

use bytes::Bytes;
use cqlink_cql::frame::response::{authenticate, result, NonErrorResponse, Response};
use uuid::Uuid;

use crate::errors::QueryError;
pub use query_result::{ColumnSpecs, IntoRowsResultError, QueryResult, ResultNotRowsError};
pub use unbuffered::{UnbufferedResult, UnbufferedRowSet};

pub(crate) struct QueryResponse {
    pub(crate) response: Response,
    pub(crate) tracing_id: Option<Uuid>,
    pub(crate) warnings: Vec<String>,
    pub(crate) custom_payload: Option<HashMap<String, Bytes>>,
}

// A QueryResponse in which response can not be Response::Error
pub(crate) struct NonErrorQueryResponse {
    pub(crate) response: NonErrorResponse,
    pub(crate) tracing_id: Option<Uuid>,
    pub(crate) warnings: Vec<String>,
    pub(crate) custom_payload: Option<HashMap<String, Bytes>>,
}

impl QueryResponse {
    pub(crate) fn into_non_error_query_response(self) -> Result<NonErrorQueryResponse, QueryError> {
        Ok(NonErrorQueryResponse {
            response: self.response.into_non_error_response()?,
            tracing_id: self.tracing_id,
            warnings: self.warnings,
            custom_payload: self.custom_payload,
        })
    }

    pub(crate) fn into_query_result(self) -> Result<QueryResult, QueryError> {
        self.into_non_error_query_response()?.into_query_result()
    }
}

impl NonErrorQueryResponse {
    pub(crate) fn as_set_keyspace(&self) -> Option<&result::SetKeyspace> {
        match &self.response {
            NonErrorResponse::Result(result::Result::SetKeyspace(sk)) => Some(sk),
            _ => None,
        }
    }

    /// Converts a RESULT response into a [`QueryResult`]. Any other response
    /// does not answer a request carrying a statement.
    pub(crate) fn into_query_result(self) -> Result<QueryResult, QueryError> {
        let Self {
            response,
            tracing_id,
            warnings,
            custom_payload,
        } = self;
        let result = QueryResult::new(tracing_id, warnings).with_custom_payload(custom_payload);
        Ok(match response {
            NonErrorResponse::Result(result::Result::Rows(rows)) => result.with_rows(rows),
            NonErrorResponse::Result(result::Result::SetKeyspace(sk)) => {
                result.with_set_keyspace(sk.keyspace_name)
            }
            NonErrorResponse::Result(result::Result::SchemaChange(sc)) => {
                result.with_schema_change(sc.event)
            }
            NonErrorResponse::Result(result::Result::Void) => result,
            _ => {
                return Err(QueryError::UnexpectedResponse(response.to_response_kind()));
            }
        })
    }
}

pub(crate) enum NonErrorStartupResponse {
    Ready,
    Authenticate(authenticate::Authenticate),
}

pub(crate) enum NonErrorAuthResponse {
    AuthChallenge(authenticate::AuthChallenge),
    AuthSuccess(authenticate::AuthSuccess),
}
