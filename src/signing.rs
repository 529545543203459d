//! Signature backend client.
//!
//! The backend holds the real AWS credentials and issues a time-scoped
//! signature per protocol phase. This module only builds the request
//! descriptions and parses the JSON responses; sending is delegated to the
//! [`crate::transport::Transport`] in use.

use std::collections::HashMap;

use serde::Deserialize;

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::transport::{HttpRequest, Method};
use crate::types::{Chunk, Signature};

/// The full signature set for one upload session: one signature per chunk
/// PUT, one for the part listing, one for the completion call.
#[derive(Debug, Clone, Deserialize)]
pub struct AllSignatures {
    pub chunk_signatures: HashMap<u32, Signature>,
    pub complete_signature: Signature,
    pub list_signature: Signature,
}

/// Builds `GET <backend>/get_init_signature`.
pub fn init_signature_request(
    config: &UploadConfig,
    key: &str,
    file_name: &str,
    file_size: u64,
    content_type: &str,
) -> HttpRequest {
    HttpRequest::new(
        Method::Get,
        format!("{}/get_init_signature", config.signature_backend),
    )
    .query("key", key)
    .query("filename", file_name)
    .query("filesize", file_size)
    .query("mime_type", content_type)
    .query("bucket", &config.bucket)
    .query("acl", &config.acl)
    .query("encrypted", config.encrypted)
}

/// Parses the init-signature response body.
pub fn parse_init_signature(body: &[u8]) -> Result<Signature, UploadError> {
    serde_json::from_slice(body)
        .map_err(|e| UploadError::Protocol(format!("malformed init signature response: {e}")))
}

/// Builds `GET <backend>/get_all_signatures`.
pub fn all_signatures_request(
    config: &UploadConfig,
    key: &str,
    upload_id: &str,
    total_chunks: usize,
    content_type: &str,
) -> HttpRequest {
    HttpRequest::new(
        Method::Get,
        format!("{}/get_all_signatures", config.signature_backend),
    )
    .query("upload_id", upload_id)
    .query("total_chunks", total_chunks)
    .query("mime_type", content_type)
    .query("bucket", &config.bucket)
    .query("key", key)
}

/// Parses the all-signatures response and verifies that every planned part
/// has a chunk signature. A missing entry means the backend disagrees about
/// the chunk plan, which no retry can fix.
pub fn parse_all_signatures(body: &[u8], plan: &[Chunk]) -> Result<AllSignatures, UploadError> {
    let signatures: AllSignatures = serde_json::from_slice(body)
        .map_err(|e| UploadError::Protocol(format!("malformed signatures response: {e}")))?;

    for chunk in plan {
        if !signatures.chunk_signatures.contains_key(&chunk.number) {
            return Err(UploadError::Protocol(format!(
                "signing backend returned no signature for chunk #{}",
                chunk.number
            )));
        }
    }

    Ok(signatures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan_chunks;

    fn config() -> UploadConfig {
        UploadConfig::new("my-bucket", "AKIA123", "https://sign.example.com")
    }

    #[test]
    fn init_request_carries_all_query_params() {
        let req = init_signature_request(&config(), "/my-bucket/1_f.bin", "f.bin", 42, "video/mp4");
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.url, "https://sign.example.com/get_init_signature");
        assert_eq!(req.query_value("key"), Some("/my-bucket/1_f.bin"));
        assert_eq!(req.query_value("filename"), Some("f.bin"));
        assert_eq!(req.query_value("filesize"), Some("42"));
        assert_eq!(req.query_value("mime_type"), Some("video/mp4"));
        assert_eq!(req.query_value("bucket"), Some("my-bucket"));
        assert_eq!(req.query_value("acl"), Some("public-read"));
        assert_eq!(req.query_value("encrypted"), Some("false"));
        assert!(req.body.is_none());
    }

    #[test]
    fn parse_init_signature_ok() {
        let sig = parse_init_signature(br#"{"signature":"abc","date":"Mon, 1 Jan"}"#).unwrap();
        assert_eq!(sig.signature, "abc");
        assert_eq!(sig.date, "Mon, 1 Jan");
    }

    #[test]
    fn parse_init_signature_shape_mismatch() {
        let err = parse_init_signature(br#"{"signature":"abc"}"#).unwrap_err();
        assert!(matches!(err, UploadError::Protocol(_)));
    }

    #[test]
    fn all_signatures_request_params() {
        let req = all_signatures_request(&config(), "/k", "upload-1", 3, "video/mp4");
        assert_eq!(req.url, "https://sign.example.com/get_all_signatures");
        assert_eq!(req.query_value("upload_id"), Some("upload-1"));
        assert_eq!(req.query_value("total_chunks"), Some("3"));
        assert_eq!(req.query_value("key"), Some("/k"));
    }

    #[test]
    fn parse_all_signatures_ok() {
        let body = br#"{
            "chunk_signatures": {
                "1": {"signature": "s1", "date": "d1"},
                "2": {"signature": "s2", "date": "d2"}
            },
            "complete_signature": {"signature": "sc", "date": "dc"},
            "list_signature": {"signature": "sl", "date": "dl"}
        }"#;
        let plan = plan_chunks(8, 4);
        let sigs = parse_all_signatures(body, &plan).unwrap();
        assert_eq!(sigs.chunk_signatures.len(), 2);
        assert_eq!(sigs.chunk_signatures[&2].signature, "s2");
        assert_eq!(sigs.complete_signature.signature, "sc");
        assert_eq!(sigs.list_signature.signature, "sl");
    }

    #[test]
    fn missing_chunk_signature_is_protocol_error() {
        let body = br#"{
            "chunk_signatures": {"1": {"signature": "s1", "date": "d1"}},
            "complete_signature": {"signature": "sc", "date": "dc"},
            "list_signature": {"signature": "sl", "date": "dl"}
        }"#;
        let plan = plan_chunks(8, 4);
        let err = parse_all_signatures(body, &plan).unwrap_err();
        match err {
            UploadError::Protocol(msg) => assert!(msg.contains("chunk #2"), "{msg}"),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }
}
