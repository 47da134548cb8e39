//! Query model: requests, responses, proof ops, and error encoding.
//!
//! Query failures never escape as `Err`: they are encoded into the response
//! with a stable code and a log line, so a misbehaving client cannot crash
//! the commit driver.

/// A state query against the multi-store.
///
/// `path` is `/<storeName>[/<subpath>]`; the multi-store routes on the first
/// segment and hands the sub-store the rewritten subpath. The special path
/// `/proofs` returns the commit root and one aggregation proof per store.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    /// Slash-separated route.
    pub path: String,
    /// Operation payload (the key for `/key`, the prefix for `/subspace`).
    pub data: Vec<u8>,
    /// Version to query; 0 means the latest committed version.
    pub height: i64,
    /// Whether to include Merkle proofs.
    pub prove: bool,
}

/// Result of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    /// 0 on success; a [`codes`] constant otherwise.
    pub code: u32,
    /// Human-readable failure description; empty on success.
    pub log: String,
    /// Version the response was read at.
    pub height: i64,
    /// Echo of the queried key.
    pub key: Vec<u8>,
    /// Result payload; empty when absent.
    pub value: Vec<u8>,
    /// Proof chain, bottom-up, when requested.
    pub proof_ops: Option<ProofOps>,
}

impl QueryResponse {
    /// Whether the query succeeded.
    pub fn is_ok(&self) -> bool {
        self.code == codes::OK
    }
}

/// An opaque proof fragment tagged with its operation type.
///
/// Proofs compose bottom-up: a sub-store op proving the leaf against the
/// store root, then a multi-store op proving the store against the commit
/// root.
#[derive(Debug, Clone, PartialEq)]
pub struct ProofOp {
    /// Fragment kind: [`PROOF_OP_TREE`] or [`PROOF_OP_MULTISTORE`].
    pub op_type: String,
    /// What the fragment proves (the queried key, or the store name).
    pub key: Vec<u8>,
    /// Encoded proof payload.
    pub data: Vec<u8>,
}

/// An ordered proof chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProofOps {
    /// Fragments, sub-store leaf first.
    pub ops: Vec<ProofOp>,
}

/// Op type for a sub-store inclusion proof.
pub const PROOF_OP_TREE: &str = "trellis:tree";

/// Op type for the multi-store aggregation proof.
pub const PROOF_OP_MULTISTORE: &str = "trellis:multistore";

pub(crate) const PROOFS_PATH: &str = "proofs";

/// Stable query response codes.
pub mod codes {
    /// Success.
    pub const OK: u32 = 0;
    /// Internal failure (metadata unreadable, store inconsistent).
    pub const INTERNAL: u32 = 1;
    /// The request was understood but cannot be served.
    pub const INVALID_REQUEST: u32 = 3;
    /// The request was not understood (bad path, unknown store).
    pub const UNKNOWN_REQUEST: u32 = 6;
}

/// A query failure, encoded into the response at the query boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    /// Bad path or unknown store.
    #[error("unknown request: {0}")]
    UnknownRequest(String),
    /// Understood but unservable (pruned height, empty proof).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Internal inconsistency.
    #[error("internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// The stable response code for this failure.
    pub fn code(&self) -> u32 {
        match self {
            QueryError::UnknownRequest(_) => codes::UNKNOWN_REQUEST,
            QueryError::InvalidRequest(_) => codes::INVALID_REQUEST,
            QueryError::Internal(_) => codes::INTERNAL,
        }
    }

    /// Encode into a failed response.
    pub fn into_response(self) -> QueryResponse {
        QueryResponse {
            code: self.code(),
            log: self.to_string(),
            ..QueryResponse::default()
        }
    }
}

/// Split `/<storeName>[/<subpath>]` into the store name and the rewritten
/// subpath (empty when absent). Paths must begin with `/`.
pub(crate) fn parse_path(path: &str) -> Result<(String, String), QueryError> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| QueryError::UnknownRequest(format!("invalid path: {path}")))?;

    match rest.split_once('/') {
        Some((store, subpath)) => Ok((store.to_string(), format!("/{subpath}"))),
        None => Ok((rest.to_string(), String::new())),
    }
}

/// Whether a sub-store subpath must come back with a proof when requested.
pub(crate) fn require_proof(subpath: &str) -> bool {
    subpath == "/key"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_path() {
        assert_eq!(
            parse_path("/bank/key").unwrap(),
            ("bank".to_string(), "/key".to_string())
        );
        assert_eq!(
            parse_path("/bank").unwrap(),
            ("bank".to_string(), String::new())
        );
        assert_eq!(
            parse_path("/bank/key/nested").unwrap(),
            ("bank".to_string(), "/key/nested".to_string())
        );
        assert!(parse_path("bank/key").is_err());
        assert!(parse_path("").is_err());
    }

    #[test]
    fn test_require_proof() {
        assert!(require_proof("/key"));
        assert!(!require_proof("/subspace"));
        assert!(!require_proof(""));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            QueryError::UnknownRequest("x".into()).into_response().code,
            codes::UNKNOWN_REQUEST
        );
        assert_eq!(
            QueryError::InvalidRequest("x".into()).into_response().code,
            codes::INVALID_REQUEST
        );
        assert_eq!(
            QueryError::Internal("x".into()).into_response().code,
            codes::INTERNAL
        );
        let res = QueryError::InvalidRequest("nope".into()).into_response();
        assert!(!res.is_ok());
        assert!(res.log.contains("nope"));
    }
}
