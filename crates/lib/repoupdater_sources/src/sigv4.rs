//! A minimal AWS Signature Version 4 signer, just enough to call
//! CodeCommit's `ListRepositories`/`BatchGetRepositories` JSON 1.1 API
//! (spec.md §4.B: the AWS CodeCommit `Source`). No AWS SDK sits in this
//! workspace's dependency stack, so this is new code grounded directly on
//! the SigV4 spec rather than ported from a corpus example — `hmac`/`sha2`
//! are the same primitives `yabloky-komodo`'s core binary uses elsewhere in
//! the retrieval pack for keyed signing.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub struct SigningKey<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
}

/// Returns the `Authorization` header value and the `x-amz-date` header
/// value a POST to CodeCommit's JSON API needs.
pub fn sign_codecommit_request(key: &SigningKey, target: &str, body: &str, now: DateTime<Utc>) -> (String, String) {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let host = format!("codecommit.{}.amazonaws.com", key.region);

    let canonical_headers = format!(
        "content-type:application/x-amz-json-1.1\nhost:{host}\nx-amz-date:{amz_date}\nx-amz-target:{target}\n"
    );
    let signed_headers = "content-type;host;x-amz-date;x-amz-target";
    let payload_hash = hex_sha256(body);

    let canonical_request =
        format!("POST\n/\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}");

    let credential_scope = format!("{date_stamp}/{}/codecommit/aws4_request", key.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        hex_sha256(&canonical_request)
    );

    let signing_key = derive_signing_key(key.secret_access_key, &date_stamp, key.region, "codecommit");
    let signature = hex::encode(hmac_sha256(&signing_key, &string_to_sign));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        key.access_key_id
    );

    (authorization, amz_date)
}

fn hex_sha256(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts keys of any length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn derive_signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date_stamp);
    let k_region = hmac_sha256(&k_date, region);
    let k_service = hmac_sha256(&k_region, service);
    hmac_sha256(&k_service, "aws4_request")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn produces_stable_signature_for_fixed_inputs() {
        let key = SigningKey { access_key_id: "AKIDEXAMPLE", secret_access_key: "secret", region: "us-east-1" };
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let (auth, date) = sign_codecommit_request(&key, "CodeCommit_20150413.ListRepositories", "{}", now);
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240101/us-east-1/codecommit/aws4_request"));
        assert_eq!(date, "20240101T000000Z");

        let (auth2, _) = sign_codecommit_request(&key, "CodeCommit_20150413.ListRepositories", "{}", now);
        assert_eq!(auth, auth2);
    }
}
