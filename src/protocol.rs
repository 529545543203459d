//! Storage protocol operations.
//!
//! Request builders and XML codecs for the four S3 multipart calls:
//! initiate, upload part, list parts, complete. Every request carries the
//! `Authorization: AWS <access-key>:<signature>` and `x-amz-date` headers
//! for its phase signature.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::transport::{HttpRequest, HttpResponse, Method};
use crate::types::{Chunk, RemotePart, Signature};

fn authorization(config: &UploadConfig, signature: &Signature) -> String {
    format!("AWS {}:{}", config.access_key_id, signature.signature)
}

fn content_disposition(file_name: &str) -> String {
    format!("attachment; filename={file_name}")
}

/// Strips the surrounding quote characters S3 puts around ETag values.
pub fn strip_etag_quotes(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

// ---------------------------------------------------------------------------
// Initiate
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InitiateMultipartUploadResult {
    #[serde(rename = "UploadId")]
    upload_id: String,
}

/// Builds `POST <host>/<key>?uploads`.
pub fn initiate_request(
    config: &UploadConfig,
    key: &str,
    file_name: &str,
    signature: &Signature,
) -> HttpRequest {
    let mut req = HttpRequest::new(Method::Post, format!("{}?uploads", config.object_url(key)))
        .header("Authorization", authorization(config, signature))
        .header("x-amz-date", &signature.date)
        .header("x-amz-acl", &config.acl)
        .header("Content-Disposition", content_disposition(file_name));
    if config.encrypted {
        req = req.header("x-amz-server-side-encryption", "AES256");
    }
    req
}

/// Extracts the `UploadId` from the initiation response body.
pub fn parse_initiate(body: &[u8]) -> Result<String, UploadError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| UploadError::Protocol(format!("initiate response is not UTF-8: {e}")))?;
    let result: InitiateMultipartUploadResult = quick_xml::de::from_str(text)
        .map_err(|e| UploadError::Protocol(format!("malformed initiate response: {e}")))?;
    Ok(result.upload_id)
}

// ---------------------------------------------------------------------------
// Upload part
// ---------------------------------------------------------------------------

/// Builds `PUT <host>/<key>?uploadId=<id>&partNumber=<n>` with the chunk's
/// bytes as the body.
pub fn upload_part_request(
    config: &UploadConfig,
    key: &str,
    file_name: &str,
    content_type: &str,
    upload_id: &str,
    chunk: &Chunk,
    signature: &Signature,
    body: Vec<u8>,
) -> HttpRequest {
    HttpRequest::new(Method::Put, config.object_url(key))
        .query("uploadId", upload_id)
        .query("partNumber", chunk.number)
        .header("Authorization", authorization(config, signature))
        .header("x-amz-date", &signature.date)
        .header("Content-Disposition", content_disposition(file_name))
        .header("Content-Type", content_type)
        .body(body)
}

/// Pulls the confirmed ETag out of a part upload response, stripping the
/// surrounding quotes. A success response without one cannot be reconciled.
pub fn extract_etag(response: &HttpResponse) -> Result<String, UploadError> {
    match response.header("ETag") {
        Some(etag) if !etag.is_empty() => Ok(strip_etag_quotes(etag)),
        _ => Err(UploadError::Protocol(
            "part upload response did not include an ETag header".to_string(),
        )),
    }
}

// ---------------------------------------------------------------------------
// List parts
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListPartsResult {
    #[serde(rename = "Part", default)]
    parts: Vec<PartXml>,
}

#[derive(Debug, Deserialize)]
struct PartXml {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
    #[serde(rename = "Size")]
    size: u64,
}

/// Builds `GET <host>/<key>?uploadId=<id>`.
pub fn list_parts_request(
    config: &UploadConfig,
    key: &str,
    upload_id: &str,
    signature: &Signature,
) -> HttpRequest {
    HttpRequest::new(Method::Get, config.object_url(key))
        .query("uploadId", upload_id)
        .header("Authorization", authorization(config, signature))
        .header("x-amz-date", &signature.date)
}

/// Parses the store's part listing.
pub fn parse_list_parts(body: &[u8]) -> Result<Vec<RemotePart>, UploadError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| UploadError::Protocol(format!("list parts response is not UTF-8: {e}")))?;
    let result: ListPartsResult = quick_xml::de::from_str(text)
        .map_err(|e| UploadError::Protocol(format!("malformed list parts response: {e}")))?;
    Ok(result
        .parts
        .into_iter()
        .map(|p| RemotePart {
            part_number: p.part_number,
            etag: strip_etag_quotes(&p.etag),
            size: p.size,
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Complete
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
struct CompleteMultipartUpload {
    #[serde(rename = "Part")]
    parts: Vec<CompletedPartXml>,
}

#[derive(Debug, Serialize)]
struct CompletedPartXml {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
}

#[derive(Debug, Deserialize)]
struct CompleteMultipartUploadResult {
    #[serde(rename = "Location")]
    location: Option<String>,
}

/// Renders the `<CompleteMultipartUpload>` body from the confirmed ETags,
/// ordered by ascending part number (the map's iteration order).
pub fn complete_body(etags: &BTreeMap<u32, String>) -> Result<Vec<u8>, UploadError> {
    let document = CompleteMultipartUpload {
        parts: etags
            .iter()
            .map(|(&part_number, etag)| CompletedPartXml {
                part_number,
                etag: etag.clone(),
            })
            .collect(),
    };
    let xml = quick_xml::se::to_string(&document)
        .map_err(|e| UploadError::Protocol(format!("failed to build completion body: {e}")))?;
    Ok(xml.into_bytes())
}

/// Builds `POST <host>/<key>?uploadId=<id>` carrying the completion body.
pub fn complete_request(
    config: &UploadConfig,
    key: &str,
    file_name: &str,
    content_type: &str,
    upload_id: &str,
    etags: &BTreeMap<u32, String>,
    signature: &Signature,
) -> Result<HttpRequest, UploadError> {
    Ok(HttpRequest::new(Method::Post, config.object_url(key))
        .query("uploadId", upload_id)
        .header("Authorization", authorization(config, signature))
        .header("x-amz-date", &signature.date)
        .header("Content-Type", content_type)
        .header("Content-Disposition", content_disposition(file_name))
        .body(complete_body(etags)?))
}

/// Extracts the final object location from the completion response. A
/// response without one is a protocol-shape failure, not a retry candidate.
pub fn parse_complete(body: &[u8]) -> Result<String, UploadError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| UploadError::Protocol(format!("completion response is not UTF-8: {e}")))?;
    let result: CompleteMultipartUploadResult = quick_xml::de::from_str(text)
        .map_err(|e| UploadError::Protocol(format!("malformed completion response: {e}")))?;
    match result.location {
        Some(location) if !location.is_empty() => Ok(location),
        _ => Err(UploadError::Protocol(
            "completion response did not include a Location".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> UploadConfig {
        UploadConfig::new("my-bucket", "AKIA123", "https://sign.example.com")
    }

    fn sig() -> Signature {
        Signature {
            signature: "sig-value".into(),
            date: "Mon, 1 Jan".into(),
        }
    }

    fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
        req.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn initiate_request_shape() {
        let req = initiate_request(&config(), "/my-bucket/1_f.bin", "f.bin", &sig());
        assert_eq!(req.method, Method::Post);
        assert_eq!(
            req.full_url(),
            "https://my-bucket.s3.amazonaws.com/my-bucket/1_f.bin?uploads"
        );
        assert_eq!(header(&req, "Authorization"), Some("AWS AKIA123:sig-value"));
        assert_eq!(header(&req, "x-amz-date"), Some("Mon, 1 Jan"));
        assert_eq!(header(&req, "x-amz-acl"), Some("public-read"));
        assert_eq!(
            header(&req, "Content-Disposition"),
            Some("attachment; filename=f.bin")
        );
        assert_eq!(header(&req, "x-amz-server-side-encryption"), None);
    }

    #[test]
    fn initiate_request_encryption_header() {
        let mut config = config();
        config.encrypted = true;
        let req = initiate_request(&config, "/k", "f.bin", &sig());
        assert_eq!(header(&req, "x-amz-server-side-encryption"), Some("AES256"));
    }

    #[test]
    fn parse_initiate_extracts_upload_id() {
        let body = br#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Bucket>my-bucket</Bucket>
  <Key>f.bin</Key>
  <UploadId>VXBsb2FkIElE</UploadId>
</InitiateMultipartUploadResult>"#;
        assert_eq!(parse_initiate(body).unwrap(), "VXBsb2FkIElE");
    }

    #[test]
    fn parse_initiate_rejects_missing_upload_id() {
        let body = b"<InitiateMultipartUploadResult></InitiateMultipartUploadResult>";
        assert!(matches!(
            parse_initiate(body),
            Err(UploadError::Protocol(_))
        ));
    }

    #[test]
    fn upload_part_request_shape() {
        let chunk = Chunk {
            number: 2,
            start: 4,
            end: 8,
        };
        let req = upload_part_request(
            &config(),
            "/k",
            "f.bin",
            "video/mp4",
            "upload-1",
            &chunk,
            &sig(),
            b"data".to_vec(),
        );
        assert_eq!(req.method, Method::Put);
        assert_eq!(req.query_value("uploadId"), Some("upload-1"));
        assert_eq!(req.query_value("partNumber"), Some("2"));
        assert_eq!(header(&req, "Content-Type"), Some("video/mp4"));
        assert_eq!(req.body.as_deref(), Some(b"data".as_slice()));
    }

    #[test]
    fn extract_etag_strips_quotes() {
        let resp = HttpResponse {
            status: 200,
            headers: vec![("ETag".into(), "\"abc123\"".into())],
            body: Vec::new(),
        };
        assert_eq!(extract_etag(&resp).unwrap(), "abc123");
    }

    #[test]
    fn extract_etag_missing_is_protocol_error() {
        let resp = HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
        };
        assert!(matches!(
            extract_etag(&resp),
            Err(UploadError::Protocol(_))
        ));
    }

    #[test]
    fn parse_list_parts_multiple_entries() {
        let body = br#"<?xml version="1.0" encoding="UTF-8"?>
<ListPartsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Bucket>my-bucket</Bucket>
  <UploadId>upload-1</UploadId>
  <Part><PartNumber>1</PartNumber><ETag>"aaa"</ETag><Size>4</Size></Part>
  <Part><PartNumber>2</PartNumber><ETag>"bbb"</ETag><Size>2</Size></Part>
</ListPartsResult>"#;
        let parts = parse_list_parts(body).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0],
            RemotePart {
                part_number: 1,
                etag: "aaa".into(),
                size: 4
            }
        );
        assert_eq!(parts[1].etag, "bbb");
        assert_eq!(parts[1].size, 2);
    }

    #[test]
    fn parse_list_parts_empty_listing() {
        let body = b"<ListPartsResult></ListPartsResult>";
        assert!(parse_list_parts(body).unwrap().is_empty());
    }

    #[test]
    fn complete_body_is_ordered_by_part_number() {
        let mut etags = BTreeMap::new();
        etags.insert(2, "b".to_string());
        etags.insert(1, "a".to_string());
        let body = complete_body(&etags).unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "<CompleteMultipartUpload>\
             <Part><PartNumber>1</PartNumber><ETag>a</ETag></Part>\
             <Part><PartNumber>2</PartNumber><ETag>b</ETag></Part>\
             </CompleteMultipartUpload>"
        );
    }

    #[test]
    fn complete_request_shape() {
        let mut etags = BTreeMap::new();
        etags.insert(1, "a".to_string());
        let req = complete_request(
            &config(),
            "/k",
            "f.bin",
            "video/mp4",
            "upload-1",
            &etags,
            &sig(),
        )
        .unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.query_value("uploadId"), Some("upload-1"));
        assert_eq!(header(&req, "Content-Type"), Some("video/mp4"));
        assert!(req.body.is_some());
    }

    #[test]
    fn parse_complete_extracts_location() {
        let body = br#"<CompleteMultipartUploadResult>
  <Location>https://my-bucket.s3.amazonaws.com/f.bin</Location>
  <Bucket>my-bucket</Bucket>
</CompleteMultipartUploadResult>"#;
        assert_eq!(
            parse_complete(body).unwrap(),
            "https://my-bucket.s3.amazonaws.com/f.bin"
        );
    }

    #[test]
    fn parse_complete_missing_location_is_protocol_error() {
        let body = b"<CompleteMultipartUploadResult></CompleteMultipartUploadResult>";
        assert!(matches!(
            parse_complete(body),
            Err(UploadError::Protocol(_))
        ));
    }
}
