//! A minimal AWS Signature Version 4 request signer, built directly on top of
//! `reqwest::blocking` rather than pulling in a dedicated S3 client crate.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub struct SigningCredentials<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
}

/// A timestamp in the two formats SigV4 needs, supplied by the caller so this
/// module never touches the system clock directly.
pub struct SigningClock {
    /// `YYYYMMDDTHHMMSSZ`
    pub amz_date: String,
    /// `YYYYMMDD`
    pub date_stamp: String,
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Signs one request and returns the `Authorization` header value.
///
/// `canonical_headers` must be sorted by header name and already include
/// `host` and `x-amz-date`; `signed_headers` is the semicolon-joined list of
/// the same header names.
#[allow(clippy::too_many_arguments)]
pub fn sign(
    creds: &SigningCredentials,
    clock: &SigningClock,
    method: &str,
    canonical_uri: &str,
    canonical_query_string: &str,
    canonical_headers: &str,
    signed_headers: &str,
    payload: &[u8],
) -> String {
    let payload_hash = sha256_hex(payload);
    let canonical_request = format!(
        "{method}\n{canonical_uri}\n{canonical_query_string}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    );

    let scope = format!("{}/{}/s3/aws4_request", clock.date_stamp, creds.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        clock.amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let k_date = hmac_sha256(format!("AWS4{}", creds.secret_access_key).as_bytes(), clock.date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, creds.region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, scope, signed_headers, signature
    )
}

/// Hex-encodes the SHA-256 of `payload`, used for the
/// `x-amz-content-sha256` header every request must carry.
#[must_use]
pub fn payload_sha256_hex(payload: &[u8]) -> String {
    sha256_hex(payload)
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_hash_is_stable() {
        assert_eq!(
            payload_sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn signing_produces_nonempty_authorization_header() {
        let creds = SigningCredentials {
            access_key_id: "AKIDEXAMPLE",
            secret_access_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
            region: "us-east-1",
        };
        let clock = SigningClock {
            amz_date: "20130524T000000Z".to_string(),
            date_stamp: "20130524".to_string(),
        };
        let header = sign(
            &creds,
            &clock,
            "PUT",
            "/test.txt",
            "",
            "host:examplebucket.s3.amazonaws.com\nx-amz-date:20130524T000000Z\n",
            "host;x-amz-date",
            b"Welcome to Amazon S3.",
        );
        assert!(header.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20130524/us-east-1/s3/aws4_request"));
    }
}
