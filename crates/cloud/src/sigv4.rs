//! AWS Signature Version 4 request signing.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::CloudError;
use crate::models::RoleCredentials;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Inputs that scope a signature.
#[derive(Debug, Clone, Copy)]
pub struct SigningParams<'a> {
    /// Credentials used to derive the signing key.
    pub credentials: &'a RoleCredentials,
    /// Region the request is sent to.
    pub region: &'a str,
    /// Signing name of the service (`eks`, `iam`, ...).
    pub service: &'a str,
    /// Request time.
    pub time: DateTime<Utc>,
}

/// Sign a request and return the headers to attach to it.
///
/// `headers` are extra headers that must be covered by the signature; `host`
/// is always derived from `url`.
///
/// # Errors
/// Returns [`CloudError::Config`] if the URL has no host.
pub fn sign(
    method: &str,
    url: &Url,
    headers: &[(&str, &str)],
    payload: &[u8],
    params: &SigningParams<'_>,
) -> Result<Vec<(String, String)>, CloudError> {
    let host = host_header(url)?;
    let amz_date = params.time.format("%Y%m%dT%H%M%SZ").to_string();
    let date = params.time.format("%Y%m%d").to_string();

    let mut signed: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    signed.push(("host".to_string(), host));
    signed.push(("x-amz-date".to_string(), amz_date.clone()));
    if !params.credentials.session_token.is_empty() {
        signed.push((
            "x-amz-security-token".to_string(),
            params.credentials.session_token.clone(),
        ));
    }
    signed.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_headers: String = signed.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();
    let signed_headers = signed
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{method}\n{}\n{}\n{canonical_headers}\n{signed_headers}\n{}",
        canonical_uri(url),
        canonical_query(url),
        hex::encode(Sha256::digest(payload)),
    );

    let scope = format!("{date}/{}/{}/aws4_request", params.region, params.service);
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(
        &params.credentials.secret_access_key,
        &date,
        params.region,
        params.service,
    )?;
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        params.credentials.access_key_id
    );

    let mut out = vec![
        ("authorization".to_string(), authorization),
        ("x-amz-date".to_string(), amz_date),
    ];
    if !params.credentials.session_token.is_empty() {
        out.push((
            "x-amz-security-token".to_string(),
            params.credentials.session_token.clone(),
        ));
    }
    Ok(out)
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CloudError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CloudError::Config(format!("invalid signing key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, CloudError> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

fn host_header(url: &Url) -> Result<String, CloudError> {
    let host = url
        .host_str()
        .ok_or_else(|| CloudError::Config(format!("URL has no host: {url}")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// RFC 3986 encoding with the unreserved set AWS expects.
fn uri_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn example_credentials(session_token: &str) -> RoleCredentials {
        RoleCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            session_token: session_token.into(),
            expiration: 0,
        }
    }

    #[test]
    fn test_signing_key_matches_published_example() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20150830",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn test_sign_matches_published_example() {
        let creds = example_credentials("");
        let url = Url::parse("https://iam.amazonaws.com/?Action=ListUsers&Version=2010-05-08")
            .unwrap();
        let params = SigningParams {
            credentials: &creds,
            region: "us-east-1",
            service: "iam",
            time: Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap(),
        };
        let headers = sign(
            "GET",
            &url,
            &[(
                "Content-Type",
                "application/x-www-form-urlencoded; charset=utf-8",
            )],
            b"",
            &params,
        )
        .unwrap();

        let auth = &headers
            .iter()
            .find(|(k, _)| k == "authorization")
            .unwrap()
            .1;
        assert_eq!(
            auth,
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/iam/aws4_request, \
             SignedHeaders=content-type;host;x-amz-date, \
             Signature=5d672d79c15b13162d9279b0855cfba6789a8edb4c82c400e06b5924a6f2b5d7"
        );
        assert!(!headers.iter().any(|(k, _)| k == "x-amz-security-token"));
    }

    #[test]
    fn test_session_token_is_signed_and_attached() {
        let creds = example_credentials("session");
        let url = Url::parse("http://127.0.0.1:8080/clusters").unwrap();
        let params = SigningParams {
            credentials: &creds,
            region: "eu-west-1",
            service: "eks",
            time: Utc::now(),
        };
        let headers = sign("GET", &url, &[], b"", &params).unwrap();
        let auth = &headers[0].1;
        assert!(auth.contains("SignedHeaders=host;x-amz-date;x-amz-security-token"));
        assert!(auth.contains("/eu-west-1/eks/aws4_request"));
        assert!(headers
            .iter()
            .any(|(k, v)| k == "x-amz-security-token" && v == "session"));
    }

    #[test]
    fn test_uri_encode_reserved_characters() {
        assert_eq!(uri_encode("a b/c~"), "a%20b%2Fc~");
        assert_eq!(uri_encode("next=+1"), "next%3D%2B1");
    }
}
