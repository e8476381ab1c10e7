//! Gateway error codes shared by every component.
//!
//! These are the numeric codes clients see on the wire as a reply body's
//! `code` field. They group into three bands: client-fault (protocol/request
//! malformed), data-fault (statement failed but the transaction, if any,
//! survives), and connection-fault (the transaction is doomed and the
//! connection may need to be closed).

use std::fmt;

/// A gateway error code, carried verbatim as the reply body's `code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success,
    BadProto,
    BadReq,
    BadTxn,
    BadArg,
    BadCaller,
    DbDup,
    DbNoRef,
    DbReffed,
    DbStmt,
    DbTxn,
    TxnTimeout,
    NotSupport,
}

impl ErrorCode {
    /// The numeric wire value for this code.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Success => 0x0,
            Self::BadProto => 0x1,
            Self::BadReq => 0x2,
            Self::BadTxn => 0x3,
            Self::BadArg => 0x4,
            Self::BadCaller => 0x5,
            Self::DbDup => 0x11,
            Self::DbNoRef => 0x12,
            Self::DbReffed => 0x13,
            Self::DbStmt => 0x21,
            Self::DbTxn => 0x22,
            Self::TxnTimeout => 0x23,
            Self::NotSupport => 0x31,
        }
    }

    /// Default human-readable message for this code.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::BadProto => "bad protocol",
            Self::BadReq => "bad request",
            Self::BadTxn => "unknown transaction",
            Self::BadArg => "bad argument",
            Self::BadCaller => "transaction not owned by this caller",
            Self::DbDup => "duplicate key",
            Self::DbNoRef => "referenced row does not exist",
            Self::DbReffed => "row is referenced by another table",
            Self::DbStmt => "statement execution failed",
            Self::DbTxn => "connection lost, transaction doomed",
            Self::TxnTimeout => "transaction has timed out",
            Self::NotSupport => "unsupported column type in results",
        }
    }

    /// Connection-fault band: the worker must exit its transactional phase.
    #[must_use]
    pub const fn is_transaction_fatal(self) -> bool {
        matches!(self, Self::DbTxn | Self::TxnTimeout)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.message()) }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::ErrorCode;

    #[rstest]
    #[case(ErrorCode::Success, 0x0)]
    #[case(ErrorCode::BadProto, 0x1)]
    #[case(ErrorCode::BadTxn, 0x3)]
    #[case(ErrorCode::DbTxn, 0x22)]
    #[case(ErrorCode::TxnTimeout, 0x23)]
    #[case(ErrorCode::NotSupport, 0x31)]
    fn wire_codes_match_protocol(#[case] ec: ErrorCode, #[case] expected: u32) {
        assert_eq!(ec.code(), expected);
    }

    #[rstest]
    fn only_connection_band_is_transaction_fatal() {
        assert!(ErrorCode::DbTxn.is_transaction_fatal());
        assert!(ErrorCode::TxnTimeout.is_transaction_fatal());
        assert!(!ErrorCode::DbStmt.is_transaction_fatal());
        assert!(!ErrorCode::BadTxn.is_transaction_fatal());
    }
}
