//! AWS Signature Version 4 for the one request this binary makes: a POST
//! with a JSON body and the `host`, `x-amz-date`, `x-amz-security-token`
//! headers signed. The canonicalization is specialized to that shape
//! rather than a general header-sorting implementation.

use chrono::{DateTime, Utc};
use ring::{digest, hmac};
use zeroize::Zeroize;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADER_LIST: &str = "host;x-amz-date;x-amz-security-token";

pub struct SigningParams<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub session_token: &'a str,
    pub region: &'a str,
    pub service: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub body: &'a [u8],
    pub time: DateTime<Utc>,
}

/// Header values to attach to the outgoing request.
pub struct SignedHeaders {
    pub authorization: String,
    pub amz_date: String,
    pub content_sha256: String,
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA256, data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> hmac::Tag {
    hmac::sign(&hmac::Key::new(hmac::HMAC_SHA256, key), data)
}

/// HMAC chain over (AWS4 + secret, date, region, service, aws4_request).
fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let mut seed = format!("AWS4{secret}");
    let k_date = hmac_sha256(seed.as_bytes(), date.as_bytes());
    seed.zeroize();
    let k_region = hmac_sha256(k_date.as_ref(), region.as_bytes());
    let k_service = hmac_sha256(k_region.as_ref(), service.as_bytes());
    hmac_sha256(k_service.as_ref(), b"aws4_request")
        .as_ref()
        .to_vec()
}

fn canonical_request(params: &SigningParams<'_>, amz_date: &str, payload_hash: &str) -> String {
    format!(
        "POST\n{path}\n\nhost:{host}\nx-amz-date:{amz_date}\nx-amz-security-token:{token}\n\n{SIGNED_HEADER_LIST}\n{payload_hash}",
        path = params.path,
        host = params.host,
        token = params.session_token,
    )
}

pub fn sign(params: &SigningParams<'_>) -> SignedHeaders {
    let amz_date = params.time.format("%Y%m%dT%H%M%SZ").to_string();
    let date = params.time.format("%Y%m%d").to_string();
    let payload_hash = sha256_hex(params.body);

    let canonical = canonical_request(params, &amz_date, &payload_hash);
    let scope = format!(
        "{date}/{region}/{service}/aws4_request",
        region = params.region,
        service = params.service,
    );
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical.as_bytes())
    );

    let mut signing_key =
        derive_signing_key(params.secret_access_key, &date, params.region, params.service);
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()).as_ref());
    signing_key.zeroize();

    let authorization = format!(
        "{ALGORITHM} Credential={access_key_id}/{scope}, SignedHeaders={SIGNED_HEADER_LIST}, Signature={signature}",
        access_key_id = params.access_key_id,
    );

    SignedHeaders {
        authorization,
        amz_date,
        content_sha256: payload_hash,
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn empty_payload_hash_is_the_known_constant() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn signing_key_matches_the_published_derivation_example() {
        // Worked example from the Signature Version 4 documentation.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20150830",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    fn example_params(body: &'static [u8]) -> SigningParams<'static> {
        SigningParams {
            access_key_id: "ASIAEXAMPLEEXAMPLE",
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            session_token: "FwoGZXIvYXdzEXAMPLETOKEN==",
            region: "us-east-1",
            service: "ec2-instance-connect",
            host: "ec2-instance-connect.us-east-1.amazonaws.com",
            path: "/PutEC2HostKeys/",
            body,
            time: Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn canonical_request_shape() {
        let params = example_params(b"");
        let canonical = canonical_request(
            &params,
            "20260802T120000Z",
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        );
        assert_eq!(
            canonical,
            "POST\n\
             /PutEC2HostKeys/\n\
             \n\
             host:ec2-instance-connect.us-east-1.amazonaws.com\n\
             x-amz-date:20260802T120000Z\n\
             x-amz-security-token:FwoGZXIvYXdzEXAMPLETOKEN==\n\
             \n\
             host;x-amz-date;x-amz-security-token\n\
             e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn authorization_header_shape() {
        let params = example_params(br#"{"HostKeys":[]}"#);
        let signed = sign(&params);

        assert_eq!(signed.amz_date, "20260802T120000Z");
        assert!(signed.authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=ASIAEXAMPLEEXAMPLE/20260802/us-east-1/ec2-instance-connect/aws4_request, \
             SignedHeaders=host;x-amz-date;x-amz-security-token, Signature="
        ));
        let signature = signed.authorization.rsplit('=').next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));

        // Same inputs, same signature.
        assert_eq!(sign(&params).authorization, signed.authorization);
        // A different body changes the signature.
        let other = sign(&example_params(b"{}"));
        assert_ne!(other.authorization, signed.authorization);
    }
}
