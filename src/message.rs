//! JSON request/reply bodies exchanged with clients.
//!
//! Field shapes follow the wire protocol exactly: a request names a
//! statement (or one of the reserved `begin`/`commit`/`rollback` builtins),
//! optionally targets an open transaction, and carries positional
//! parameters; a reply always carries a code and message and optionally
//! echoes the request id, a transaction sequence number, and a results
//! array.

use serde::Serialize;
use serde_json::Value;

use crate::error::ErrorCode;

/// Reserved statement name that starts a transaction.
pub const BEGIN: &str = "begin";
/// Reserved statement name that commits the current transaction.
pub const COMMIT: &str = "commit";
/// Reserved statement name that rolls back the current transaction.
pub const ROLLBACK: &str = "rollback";

/// A successfully parsed client request body.
#[derive(Debug, Clone)]
pub struct Request {
    /// Client-assigned id, echoed in the reply.
    pub id: u64,
    /// Statement name, or one of [`BEGIN`]/[`COMMIT`]/[`ROLLBACK`].
    pub sql: String,
    /// Sequence number of the transaction this request targets, if any.
    pub txn: Option<u32>,
    /// Positional parameters for the named statement.
    pub params: Vec<Value>,
}

/// Why a request body could not be parsed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("malformed json")]
    Malformed,
    #[error("no id specified")]
    MissingId,
    #[error("no statement specified")]
    MissingSql,
    #[error("params must be an array")]
    ParamsNotArray,
}

impl ParseError {
    /// The gateway error code this parse failure maps to.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ParamsNotArray => ErrorCode::BadArg,
            Self::Malformed | Self::MissingId | Self::MissingSql => ErrorCode::BadReq,
        }
    }
}

impl Request {
    /// Parse a request body from a JSON byte slice.
    ///
    /// # Errors
    /// Returns a [`ParseError`] if the body is not an object, lacks a
    /// positive `id` or non-empty `sql`, or has a non-array `params`.
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        let Value::Object(mut obj) =
            serde_json::from_slice(body).map_err(|_| ParseError::Malformed)?
        else {
            return Err(ParseError::Malformed);
        };

        let id = obj
            .get("id")
            .and_then(Value::as_u64)
            .filter(|id| *id > 0)
            .ok_or(ParseError::MissingId)?;

        let sql = obj
            .get("sql")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(ParseError::MissingSql)?
            .to_owned();

        let txn = obj.get("txn").and_then(Value::as_u64).and_then(|t| u32::try_from(t).ok());

        // `params` is removed from the parsed object before the object is
        // retained anywhere; this implementation never retains the raw
        // object at all, so this is simply how we extract it.
        let params = match obj.remove("params") {
            None => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(ParseError::ParamsNotArray),
        };

        Ok(Self { id, sql, txn, params })
    }

    #[must_use]
    pub fn begins_txn(&self) -> bool { self.sql == BEGIN }

    #[must_use]
    pub fn ends_txn(&self) -> bool { self.sql == COMMIT || self.sql == ROLLBACK }
}

/// A reply body, always carrying a code and message.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
}

impl Reply {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<Option<String>>) -> Self {
        let message = message.into().unwrap_or_else(|| code.message().to_owned());
        Self { code: code.code(), message, id: None, txn: None, results: None }
    }

    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_txn(mut self, txn: u32) -> Self {
        self.txn = Some(txn);
        self
    }

    #[must_use]
    pub fn with_results(mut self, results: Value) -> Self {
        self.results = Some(results);
        self
    }

    /// A direct, un-routed protocol-error reply (no id or txn is known).
    #[must_use]
    pub fn bad_proto() -> Self { Self::new(ErrorCode::BadProto, None) }

    /// Serialize this reply to a JSON byte vector.
    ///
    /// # Panics
    /// Never: every field type here is infallibly serializable.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| {
            br#"{"code":33,"message":"internal serialization error"}"#.to_vec()
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn parses_minimal_request() {
        let req = Request::parse(br#"{"id":1,"sql":"begin"}"#).expect("parse");
        assert_eq!(req.id, 1);
        assert_eq!(req.sql, "begin");
        assert_eq!(req.txn, None);
        assert!(req.params.is_empty());
        assert!(req.begins_txn());
    }

    #[rstest]
    fn parses_params_and_removes_them_from_retained_state() {
        let req = Request::parse(br#"{"id":2,"sql":"x","params":[1,"a"]}"#).expect("parse");
        assert_eq!(req.params.len(), 2);
    }

    #[rstest]
    fn missing_sql_is_bad_req() {
        let err = Request::parse(br#"{"id":6}"#).expect_err("must fail");
        assert!(matches!(err, ParseError::MissingSql));
        assert_eq!(err.code(), ErrorCode::BadReq);
        assert_eq!(err.to_string(), "no statement specified");
    }

    #[rstest]
    fn missing_id_is_bad_req() {
        let err = Request::parse(br#"{"sql":"x"}"#).expect_err("must fail");
        assert!(matches!(err, ParseError::MissingId));
    }

    #[rstest]
    fn zero_id_is_treated_as_missing() {
        let err = Request::parse(br#"{"id":0,"sql":"x"}"#).expect_err("must fail");
        assert!(matches!(err, ParseError::MissingId));
    }

    #[rstest]
    fn non_array_params_is_bad_arg() {
        let err = Request::parse(br#"{"id":1,"sql":"x","params":3}"#).expect_err("must fail");
        assert!(matches!(err, ParseError::ParamsNotArray));
        assert_eq!(err.code(), ErrorCode::BadArg);
    }

    #[rstest]
    fn malformed_json_is_bad_req() {
        let err = Request::parse(b"not json").expect_err("must fail");
        assert!(matches!(err, ParseError::Malformed));
    }

    #[rstest]
    fn reply_omits_absent_optional_fields() {
        let reply = Reply::new(ErrorCode::Success, None).with_id(1);
        let json = String::from_utf8(reply.to_bytes()).expect("utf8");
        assert!(json.contains("\"id\":1"));
        assert!(!json.contains("txn"));
        assert!(!json.contains("results"));
    }

    #[rstest]
    fn text_results_are_escaped_by_serde() {
        let reply = Reply::new(ErrorCode::Success, None)
            .with_results(Value::String("a\"b\\c".to_owned()));
        let json = String::from_utf8(reply.to_bytes()).expect("utf8");
        assert!(json.contains(r#"a\"b\\c"#));
    }
}
