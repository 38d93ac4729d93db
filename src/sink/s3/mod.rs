//! S3-compatible object store sink: single-PUT for small objects, multipart
//! upload for anything larger than the configured part size.

mod sigv4;

use std::time::{SystemTime, UNIX_EPOCH};

use url::Url;

use super::Sink;
use crate::config::global_config;
use crate::error::SinkError;

/// Credentials and endpoint for one bucket. No connection pooling of its own:
/// a `reqwest::blocking::Client` is already internally connection-pooled.
#[derive(Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket_name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

pub struct S3Client {
    config: S3Config,
    http: reqwest::blocking::Client,
}

impl S3Client {
    pub fn new(config: S3Config) -> Result<Self, SinkError> {
        if !config.endpoint.starts_with("http://") && !config.endpoint.starts_with("https://") {
            return Err(SinkError::S3Request(format!("invalid endpoint: {}", config.endpoint)));
        }
        Ok(Self {
            http: reqwest::blocking::Client::new(),
            config,
        })
    }

    #[must_use]
    pub fn bucket_name(&self) -> &str {
        &self.config.bucket_name
    }

    pub fn bucket_exists(&self) -> Result<bool, SinkError> {
        let url = self.object_url("")?;
        let (date, headers) = self.sign_and_build_headers("HEAD", &url, &[])?;
        let resp = self
            .http
            .head(url.clone())
            .headers(headers)
            .header("x-amz-date", date)
            .send()
            .map_err(|e| SinkError::S3Request(e.to_string()))?;
        Ok(resp.status().is_success() || resp.status().as_u16() == 403)
    }

    fn object_url(&self, key: &str) -> Result<Url, SinkError> {
        let base = format!("{}/{}/{}", self.config.endpoint.trim_end_matches('/'), self.config.bucket_name, key);
        Url::parse(&base).map_err(|e| SinkError::S3Request(e.to_string()))
    }

    fn host(&self, url: &Url) -> String {
        match url.port() {
            Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
            None => url.host_str().unwrap_or_default().to_string(),
        }
    }

    fn sign_and_build_headers(
        &self,
        method: &str,
        url: &Url,
        payload: &[u8],
    ) -> Result<(String, reqwest::header::HeaderMap), SinkError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let (amz_date, date_stamp) = format_amz_timestamp(now);

        let host = self.host(url);
        let payload_hash = sigv4::payload_sha256_hex(payload);
        let canonical_headers = format!("host:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n");
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";

        let creds = sigv4::SigningCredentials {
            access_key_id: &self.config.access_key_id,
            secret_access_key: &self.config.secret_access_key,
            region: &self.config.region,
        };
        let clock = sigv4::SigningClock { amz_date: amz_date.clone(), date_stamp };

        let authorization = sigv4::sign(
            &creds,
            &clock,
            method,
            url.path(),
            url.query().unwrap_or(""),
            &canonical_headers,
            signed_headers,
            payload,
        );

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-amz-content-sha256", payload_hash.parse().unwrap());
        headers.insert("authorization", authorization.parse().unwrap());
        Ok((amz_date, headers))
    }

    pub fn put_object(&self, key: &str, data: &[u8]) -> Result<(), SinkError> {
        let url = self.object_url(key)?;
        let (date, headers) = self.sign_and_build_headers("PUT", &url, data)?;
        let resp = self
            .http
            .put(url)
            .headers(headers)
            .header("x-amz-date", date)
            .body(data.to_vec())
            .send()
            .map_err(|e| SinkError::S3Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SinkError::S3Request(format!("put_object failed: {}", resp.status())));
        }
        Ok(())
    }

    pub fn create_multipart_upload(&self, key: &str) -> Result<String, SinkError> {
        let mut url = self.object_url(key)?;
        url.set_query(Some("uploads"));
        let (date, headers) = self.sign_and_build_headers("POST", &url, &[])?;
        let resp = self
            .http
            .post(url)
            .headers(headers)
            .header("x-amz-date", date)
            .send()
            .map_err(|e| SinkError::S3Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SinkError::S3Request(format!("create_multipart_upload failed: {}", resp.status())));
        }
        let body = resp.text().map_err(|e| SinkError::S3Request(e.to_string()))?;
        extract_tag(&body, "UploadId").ok_or_else(|| SinkError::S3Request("missing UploadId in response".to_string()))
    }

    pub fn upload_part(&self, key: &str, upload_id: &str, part_number: u32, data: &[u8]) -> Result<String, SinkError> {
        let mut url = self.object_url(key)?;
        url.set_query(Some(&format!("partNumber={part_number}&uploadId={upload_id}")));
        let (date, headers) = self.sign_and_build_headers("PUT", &url, data)?;
        let resp = self
            .http
            .put(url)
            .headers(headers)
            .header("x-amz-date", date)
            .body(data.to_vec())
            .send()
            .map_err(|e| SinkError::S3Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SinkError::S3Request(format!("upload_part failed: {}", resp.status())));
        }
        resp.headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| SinkError::S3Request("missing ETag in response".to_string()))
    }

    pub fn complete_multipart_upload(&self, key: &str, upload_id: &str, parts: &[(u32, String)]) -> Result<(), SinkError> {
        let mut url = self.object_url(key)?;
        url.set_query(Some(&format!("uploadId={upload_id}")));

        let mut body = String::from("<CompleteMultipartUpload>");
        for (number, etag) in parts {
            body.push_str(&format!("<Part><PartNumber>{number}</PartNumber><ETag>{etag}</ETag></Part>"));
        }
        body.push_str("</CompleteMultipartUpload>");

        let (date, headers) = self.sign_and_build_headers("POST", &url, body.as_bytes())?;
        let resp = self
            .http
            .post(url)
            .headers(headers)
            .header("x-amz-date", date)
            .body(body)
            .send()
            .map_err(|e| SinkError::S3Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SinkError::MultipartIncomplete(format!("status {}", resp.status())));
        }
        Ok(())
    }
}

fn extract_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].to_string())
}

fn format_amz_timestamp(unix_secs: u64) -> (String, String) {
    // Minimal civil-from-days conversion; avoids adding a datetime dependency
    // for a single formatting need.
    let days = unix_secs / 86_400;
    let secs_of_day = unix_secs % 86_400;
    let (y, m, d) = civil_from_days(days as i64);
    let amz_date = format!(
        "{y:04}{m:02}{d:02}T{:02}{:02}{:02}Z",
        secs_of_day / 3600,
        (secs_of_day % 3600) / 60,
        secs_of_day % 60
    );
    let date_stamp = format!("{y:04}{m:02}{d:02}");
    (amz_date, date_stamp)
}

/// Howard Hinnant's `civil_from_days` algorithm (public domain), converting a
/// day count since the Unix epoch to a proleptic Gregorian `(y, m, d)`.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// Object-store-backed sink with 5 MiB part buffering, choosing between a
/// single `PutObject` and a multipart upload depending on total size.
pub struct S3Sink {
    client: std::sync::Arc<S3Client>,
    object_key: String,
    part_size: usize,
    part_buffer: Vec<u8>,
    nbytes_flushed: u64,
    upload_id: Option<String>,
    parts: Vec<(u32, String)>,
}

impl S3Sink {
    #[must_use]
    pub fn new(client: std::sync::Arc<S3Client>, object_key: impl Into<String>) -> Self {
        let part_size = global_config().s3_multipart_part_size_bytes();
        Self {
            client,
            object_key: object_key.into(),
            part_size,
            part_buffer: Vec::with_capacity(part_size),
            nbytes_flushed: 0,
            upload_id: None,
            parts: Vec::new(),
        }
    }

    fn flush_part(&mut self) -> Result<(), SinkError> {
        if self.part_buffer.is_empty() {
            return Ok(());
        }
        if self.upload_id.is_none() {
            self.upload_id = Some(self.client.create_multipart_upload(&self.object_key)?);
        }
        let upload_id = self.upload_id.clone().expect("just set");
        let part_number = self.parts.len() as u32 + 1;
        let etag = self.client.upload_part(&self.object_key, &upload_id, part_number, &self.part_buffer)?;
        self.parts.push((part_number, etag));
        self.nbytes_flushed += self.part_buffer.len() as u64;
        self.part_buffer.clear();
        Ok(())
    }
}

impl Sink for S3Sink {
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), SinkError> {
        if offset < self.nbytes_flushed {
            return Err(SinkError::OffsetBelowWatermark { offset, flushed: self.nbytes_flushed });
        }
        self.part_buffer.extend_from_slice(data);
        while self.part_buffer.len() >= self.part_size {
            let remainder = self.part_buffer.split_off(self.part_size);
            self.flush_part()?;
            self.part_buffer = remainder;
        }
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<(), SinkError> {
        if self.upload_id.is_none() {
            // Never exceeded one part: a single PUT suffices.
            return self.client.put_object(&self.object_key, &self.part_buffer);
        }
        self.flush_part()?;
        let upload_id = self.upload_id.clone().expect("set by flush_part");
        self.client.complete_multipart_upload(&self.object_key, &upload_id, &self.parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn civil_from_days_matches_known_epoch() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19_876), (2024, 6, 1));
    }

    #[test]
    fn write_below_watermark_is_rejected() {
        let client = std::sync::Arc::new(
            S3Client::new(S3Config {
                endpoint: "http://localhost:9000".to_string(),
                bucket_name: "bucket".to_string(),
                access_key_id: "id".to_string(),
                secret_access_key: "secret".to_string(),
                region: "us-east-1".to_string(),
            })
            .unwrap(),
        );
        let mut sink = S3Sink::new(client, "key");
        sink.nbytes_flushed = 10;
        assert!(matches!(sink.write(5, b"x"), Err(SinkError::OffsetBelowWatermark { .. })));
    }
}
