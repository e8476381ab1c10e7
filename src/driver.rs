//! Driver adapter: one MySQL connection per worker, prepared-statement
//! caching, JSON parameter binding, and result rendering.
//!
//! Parameter binding mirrors the original wire convention: a bare JSON
//! `null`/number/string picks its MySQL bind type from its JSON type; a
//! two-element `[typeTag, textValue]` array picks the bind type from
//! `typeTag` (`"long"`, `"unsigned"`, or `"timestamp"`) and parses
//! `textValue` accordingly; any other array is bound as a byte blob.
//! Result rendering uses the column types probed at registry load time
//! ([`crate::registry::BindType`]), since the wire value alone cannot tell
//! text and binary columns apart.

use std::collections::HashMap;

use mysql::prelude::Queryable;
use mysql::{Conn, Opts, Statement, Value as MyValue};
use serde_json::Value as JsonValue;

use crate::error::ErrorCode;
use crate::registry::{BindType, StatementDef};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("bad parameter value")]
    BadArg,
    #[error("unrecognized parameter type")]
    UnrecognizedParamType,
    #[error("wrong number of params")]
    WrongParamCount,
    #[error(transparent)]
    Mysql(#[from] mysql::Error),
}

impl DriverError {
    /// Map this failure to the gateway error code a client should see.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BadArg | Self::UnrecognizedParamType | Self::WrongParamCount => ErrorCode::BadArg,
            Self::Mysql(e) => classify_mysql_error(e),
        }
    }
}

/// Classify a `mysql` crate error into the connection-fault / data-fault
/// bands used by the wire protocol.
fn classify_mysql_error(err: &mysql::Error) -> ErrorCode {
    match err {
        mysql::Error::MySqlError(e) => match e.code {
            1022 | 1062 => ErrorCode::DbDup,
            1216 | 1452 => ErrorCode::DbNoRef,
            1217 | 1451 => ErrorCode::DbReffed,
            _ => ErrorCode::DbStmt,
        },
        mysql::Error::IoError(_) | mysql::Error::DriverError(_) => ErrorCode::DbTxn,
        _ => ErrorCode::DbStmt,
    }
}

/// The outcome of executing a non-builtin statement.
#[derive(Debug)]
pub enum Outcome {
    /// A statement with no result set (e.g. an `UPDATE`).
    Empty,
    /// An `insert-id` statement; carries `LAST_INSERT_ID()`.
    InsertId(u64),
    /// A query; one JSON array per row, in column order.
    Rows(JsonValue),
}

/// One MySQL connection owned by a single worker thread, plus its
/// per-connection prepared statement cache.
pub struct WorkerConnection {
    opts: Opts,
    conn: Option<Conn>,
    stmts: HashMap<String, Statement>,
}

impl WorkerConnection {
    #[must_use]
    pub fn new(opts: Opts) -> Self {
        Self { opts, conn: None, stmts: HashMap::new() }
    }

    fn ensure_connected(&mut self) -> Result<&mut Conn, DriverError> {
        if self.conn.is_none() {
            self.conn = Some(Conn::new(self.opts.clone())?);
            self.stmts.clear();
        }
        Ok(self.conn.as_mut().unwrap_or_else(|| unreachable!("just inserted above")))
    }

    /// Drop the underlying connection; the next call reconnects lazily.
    pub fn close(&mut self) {
        self.conn = None;
        self.stmts.clear();
    }

    /// Start a transaction by disabling autocommit, mirroring
    /// `mysql_autocommit(conn_, 0)` in the driver this adapter reimplements.
    ///
    /// # Errors
    /// Returns [`DriverError`] if the connection cannot be (re)established
    /// or the server rejects the autocommit toggle.
    pub fn begin(&mut self) -> Result<(), DriverError> {
        let result = self.ensure_connected().and_then(|c| Ok(c.query_drop("SET autocommit=0")?));
        if result.is_err() {
            self.close();
        }
        result
    }

    /// Commit the current transaction, then re-enable autocommit. A failure
    /// at either step closes the connection, since the session's
    /// transactional state is now unknown.
    ///
    /// # Errors
    /// Returns [`DriverError`] on connection loss or server rejection.
    pub fn commit(&mut self) -> Result<(), DriverError> {
        let result = self.end_txn("COMMIT");
        if result.is_err() {
            self.close();
        }
        result
    }

    /// Run `sql` (`COMMIT` or `ROLLBACK`), then re-enable autocommit.
    fn end_txn(&mut self, sql: &str) -> Result<(), DriverError> {
        let conn = self.ensure_connected()?;
        conn.query_drop(sql)?;
        conn.query_drop("SET autocommit=1")?;
        Ok(())
    }

    /// Roll back the current transaction, then re-enable autocommit. A
    /// failure at either step closes the connection, since the session's
    /// transactional state is now unknown.
    pub fn rollback(&mut self) {
        let ok = self
            .conn
            .as_mut()
            .is_some_and(|c| c.query_drop("ROLLBACK").and_then(|()| c.query_drop("SET autocommit=1")).is_ok());
        if !ok {
            self.close();
        }
    }

    /// Execute a registered statement with JSON-encoded parameters. Any
    /// failure that classifies as [`ErrorCode::DbTxn`] closes the
    /// connection, per spec: a lost/gone server dooms the connection, not
    /// just the statement.
    ///
    /// # Errors
    /// Returns [`DriverError`] if the parameter count or types are wrong,
    /// the statement fails to prepare or execute, or the connection is
    /// lost.
    pub fn execute(&mut self, def: &StatementDef, params: &[JsonValue]) -> Result<Outcome, DriverError> {
        let result = self.execute_inner(def, params);
        if let Err(e) = &result {
            if e.code() == ErrorCode::DbTxn {
                self.close();
            }
        }
        result
    }

    fn execute_inner(&mut self, def: &StatementDef, params: &[JsonValue]) -> Result<Outcome, DriverError> {
        let bound: Vec<MyValue> = params.iter().map(bind_param).collect::<Result<_, _>>()?;

        let stmt = self.prepared(def)?;
        if stmt.num_params() as usize != bound.len() {
            return Err(DriverError::WrongParamCount);
        }

        if def.insert_id {
            let conn = self.ensure_connected()?;
            conn.exec_drop(&stmt, mysql::Params::Positional(bound))?;
            let id = conn.last_insert_id();
            return Ok(Outcome::InsertId(id));
        }

        if !def.is_query {
            let conn = self.ensure_connected()?;
            conn.exec_drop(&stmt, mysql::Params::Positional(bound))?;
            return Ok(Outcome::Empty);
        }

        let conn = self.ensure_connected()?;
        let rows: Vec<mysql::Row> = conn.exec(&stmt, mysql::Params::Positional(bound))?;
        let rendered = rows
            .iter()
            .map(|row| render_row(row, &def.results))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Outcome::Rows(JsonValue::Array(rendered)))
    }

    /// Resolve `def`'s prepared statement, from this connection's cache if
    /// present. `conn` and `stmts` are only ever cleared together (see
    /// [`Self::close`]), so a cache hit always belongs to the live
    /// connection.
    fn prepared(&mut self, def: &StatementDef) -> Result<Statement, DriverError> {
        if let Some(stmt) = self.stmts.get(&def.name) {
            return Ok(stmt.clone());
        }
        let conn = self.ensure_connected()?;
        let stmt = conn.prep(&def.sql)?;
        self.stmts.insert(def.name.clone(), stmt.clone());
        Ok(stmt)
    }
}

fn parse_typed_param(type_tag: &str, text: &str) -> Result<MyValue, DriverError> {
    if text.is_empty() {
        return Err(DriverError::BadArg);
    }
    match type_tag {
        "long" => text.trim().parse::<i64>().map(MyValue::Int).map_err(|_| DriverError::BadArg),
        "unsigned" => text.trim().parse::<u64>().map(MyValue::UInt).map_err(|_| DriverError::BadArg),
        "timestamp" => parse_timestamp(text),
        _ => Err(DriverError::UnrecognizedParamType),
    }
}

/// Parse `YYYY-MM-DDTHH:MM:SS` at its correct, fixed offsets.
fn parse_timestamp(s: &str) -> Result<MyValue, DriverError> {
    let bytes = s.as_bytes();
    if bytes.len() != 19 || bytes[4] != b'-' || bytes[7] != b'-' || bytes[10] != b'T' || bytes[13] != b':' || bytes[16] != b':'
    {
        return Err(DriverError::BadArg);
    }
    let field = |range: std::ops::Range<usize>| -> Result<u32, DriverError> {
        s.get(range).and_then(|f| f.parse().ok()).ok_or(DriverError::BadArg)
    };
    let year = field(0..4)?;
    let month = field(5..7)?;
    let day = field(8..10)?;
    let hour = field(11..13)?;
    let minute = field(14..16)?;
    let second = field(17..19)?;
    Ok(MyValue::Date(
        u16::try_from(year).map_err(|_| DriverError::BadArg)?,
        u8::try_from(month).map_err(|_| DriverError::BadArg)?,
        u8::try_from(day).map_err(|_| DriverError::BadArg)?,
        u8::try_from(hour).map_err(|_| DriverError::BadArg)?,
        u8::try_from(minute).map_err(|_| DriverError::BadArg)?,
        u8::try_from(second).map_err(|_| DriverError::BadArg)?,
        0,
    ))
}

fn bind_param(value: &JsonValue) -> Result<MyValue, DriverError> {
    match value {
        JsonValue::Null => Ok(MyValue::NULL),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(MyValue::Int(i))
            } else if let Some(u) = n.as_u64() {
                Ok(MyValue::UInt(u))
            } else {
                n.as_f64().map(MyValue::Double).ok_or(DriverError::BadArg)
            }
        }
        JsonValue::String(s) => Ok(MyValue::Bytes(s.clone().into_bytes())),
        JsonValue::Array(items) => bind_array_param(items),
        JsonValue::Bool(_) | JsonValue::Object(_) => Err(DriverError::BadArg),
    }
}

fn bind_array_param(items: &[JsonValue]) -> Result<MyValue, DriverError> {
    if items.len() == 2 {
        if let (Some(tag), Some(text)) = (items[0].as_str(), items[1].as_str()) {
            return parse_typed_param(tag, text);
        }
    }
    bind_byte_array(items)
}

fn bind_byte_array(items: &[JsonValue]) -> Result<MyValue, DriverError> {
    let mut bytes = Vec::with_capacity(items.len());
    for item in items {
        let n = item.as_u64().filter(|n| *n <= u64::from(u8::MAX)).ok_or(DriverError::BadArg)?;
        bytes.push(u8::try_from(n).unwrap_or_else(|_| unreachable!("bounds checked above")));
    }
    Ok(MyValue::Bytes(bytes))
}

fn render_row(row: &mysql::Row, types: &[BindType]) -> Result<JsonValue, DriverError> {
    let mut out = Vec::with_capacity(types.len());
    for (idx, bind_type) in types.iter().enumerate() {
        let value = row.as_ref(idx).ok_or(DriverError::BadArg)?;
        out.push(render_value(value, *bind_type)?);
    }
    Ok(JsonValue::Array(out))
}

fn render_value(value: &MyValue, bind_type: BindType) -> Result<JsonValue, DriverError> {
    if matches!(value, MyValue::NULL) {
        return Ok(JsonValue::Null);
    }

    Ok(match (bind_type, value) {
        (BindType::Null, _) => JsonValue::Null,
        (BindType::Integer, MyValue::Int(n)) => JsonValue::String(n.to_string()),
        (BindType::UnsignedInt, MyValue::UInt(n)) => JsonValue::String(n.to_string()),
        (BindType::Integer | BindType::UnsignedInt, MyValue::Bytes(b)) => {
            JsonValue::String(String::from_utf8_lossy(b).into_owned())
        }
        (BindType::Float, MyValue::Float(f)) => json_number(f64::from(*f)),
        (BindType::Float, MyValue::Double(d)) => json_number(*d),
        (BindType::Text, MyValue::Bytes(b)) => JsonValue::String(String::from_utf8_lossy(b).into_owned()),
        (BindType::Binary, MyValue::Bytes(b)) => {
            JsonValue::Array(b.iter().map(|byte| JsonValue::from(*byte)).collect())
        }
        (BindType::Timestamp, MyValue::Date(y, mo, d, h, mi, s, _)) => {
            JsonValue::String(format!("{y:04}-{mo:02}-{d:02}T{h:02}:{mi:02}:{s:02}"))
        }
        (BindType::Timestamp, MyValue::Time(neg, days, h, mi, s, _)) => {
            let total_hours = u32::from(*h) + days * 24;
            let sign = if *neg { "-" } else { "" };
            JsonValue::String(format!("{sign}{total_hours:02}:{mi:02}:{s:02}"))
        }
        _ => return Err(DriverError::UnrecognizedParamType),
    })
}

fn json_number(f: f64) -> JsonValue {
    serde_json::Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn binds_plain_integer() {
        let v = bind_param(&JsonValue::from(42)).expect("bind");
        assert!(matches!(v, MyValue::Int(42)));
    }

    #[rstest]
    fn binds_plain_string_as_text() {
        let v = bind_param(&JsonValue::String("hi".into())).expect("bind");
        assert!(matches!(v, MyValue::Bytes(ref b) if b == b"hi"));
    }

    #[rstest]
    fn binds_null() {
        let v = bind_param(&JsonValue::Null).expect("bind");
        assert!(matches!(v, MyValue::NULL));
    }

    #[rstest]
    fn binds_typed_unsigned_param() {
        let arr = JsonValue::Array(vec![JsonValue::from("unsigned"), JsonValue::from("7")]);
        let v = bind_param(&arr).expect("bind");
        assert!(matches!(v, MyValue::UInt(7)));
    }

    #[rstest]
    fn binds_typed_timestamp_param() {
        let arr = JsonValue::Array(vec![JsonValue::from("timestamp"), JsonValue::from("2024-01-02T03:04:05")]);
        let v = bind_param(&arr).expect("bind");
        assert!(matches!(v, MyValue::Date(2024, 1, 2, 3, 4, 5, 0)));
    }

    #[rstest]
    fn rejects_unrecognized_type_tag() {
        let arr = JsonValue::Array(vec![JsonValue::from("nope"), JsonValue::from("1")]);
        let err = bind_param(&arr).expect_err("must fail");
        assert!(matches!(err, DriverError::UnrecognizedParamType));
    }

    #[rstest]
    fn binds_byte_array() {
        let arr = JsonValue::Array(vec![JsonValue::from(1), JsonValue::from(2), JsonValue::from(3)]);
        let v = bind_param(&arr).expect("bind");
        assert!(matches!(v, MyValue::Bytes(ref b) if b == &[1, 2, 3]));
    }

    #[rstest]
    fn timestamp_fields_are_read_from_distinct_offsets() {
        // Regression guard: the field each digit pair comes from must be
        // distinct, unlike a transcription that reads every field from the
        // same offset.
        let v = parse_timestamp("2024-03-07T21:09:55").expect("parse");
        assert!(matches!(v, MyValue::Date(2024, 3, 7, 21, 9, 55, 0)));
    }

    #[rstest]
    fn timestamp_wrong_length_is_bad_arg() {
        let err = parse_timestamp("2024-03-07").expect_err("must fail");
        assert!(matches!(err, DriverError::BadArg));
    }

    #[rstest]
    fn renders_integer_as_json_string() {
        let rendered = render_value(&MyValue::Int(-5), BindType::Integer).expect("render");
        assert_eq!(rendered, JsonValue::String("-5".into()));
    }

    #[rstest]
    fn renders_binary_as_byte_array() {
        let rendered = render_value(&MyValue::Bytes(vec![1, 2]), BindType::Binary).expect("render");
        assert_eq!(rendered, JsonValue::Array(vec![JsonValue::from(1), JsonValue::from(2)]));
    }

    #[rstest]
    fn renders_null_regardless_of_bind_type() {
        let rendered = render_value(&MyValue::NULL, BindType::Text).expect("render");
        assert_eq!(rendered, JsonValue::Null);
    }

    #[rstest]
    #[case(1062, ErrorCode::DbDup)]
    #[case(1022, ErrorCode::DbDup)]
    #[case(1452, ErrorCode::DbNoRef)]
    #[case(1451, ErrorCode::DbReffed)]
    #[case(1146, ErrorCode::DbStmt)]
    fn classifies_mysql_server_errors(#[case] code: u16, #[case] expected: ErrorCode) {
        let err = mysql::Error::MySqlError(mysql::error::MySqlError {
            state: "HY000".into(),
            message: "boom".into(),
            code,
        });
        assert_eq!(classify_mysql_error(&err), expected);
    }

    #[rstest]
    fn execute_closes_connection_when_classified_as_db_txn() {
        use std::time::Duration;

        use mysql::OptsBuilder;

        // Port 0 is never listening; the connect attempt fails fast with an
        // `IoError`, which `classify_mysql_error` maps to `DbTxn`.
        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some("127.0.0.1"))
            .tcp_port(0)
            .tcp_connect_timeout(Some(Duration::from_millis(200)))
            .into();
        let mut conn = WorkerConnection::new(opts);
        let def = StatementDef {
            name: "whatever".into(),
            sql: "select 1".into(),
            insert_id: false,
            file: "test".into(),
            lineno: 1,
            is_query: true,
            results: vec![],
        };
        let err = conn.execute(&def, &[]).expect_err("no server listening");
        assert_eq!(err.code(), ErrorCode::DbTxn);
        assert!(conn.conn.is_none(), "a db_txn-classified failure must close the connection");
    }
}
