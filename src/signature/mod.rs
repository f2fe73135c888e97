mod timestamp;
mod uri;
mod utils;

use self::{
    timestamp::Timestamp,
    utils::{hash, merge, sign},
};
use crate::clock::SkewCorrectedClock;
use crate::credentials::Credentials;
use crate::error::{ClientError, Result};
use crate::signature::uri::encode_uri;
use tungstenite::{client::IntoClientRequest, handshake::client::Request, http::header::HOST};
use url::Url;

const AWS4_HMAC_SHA256: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "iotdata";
const METHOD: &str = "GET";
const PATH: &str = "/mqtt";
const SUBPROTOCOL: &str = "mqttv3.1";

const X_AMZ_ALGORITHM: &str = "X-Amz-Algorithm";
const X_AMZ_DATE: &str = "X-Amz-Date";
const X_AMZ_CREDENTIAL: &str = "X-Amz-Credential";
const X_AMZ_SIGNED_HEADERS: &str = "X-Amz-SignedHeaders";
const X_AMZ_SIGNATURE: &str = "X-Amz-Signature";
const X_AMZ_SECURITY_TOKEN: &str = "X-Amz-Security-Token";
const SIGNED_HEADERS: &str = "host";

// inspirations:
// - http://docs.aws.amazon.com/general/latest/gr/sigv4-create-canonical-request.html
// - https://github.com/awslabs/aws-iot-core-websockets/blob/master/src/main/java/com/awslabs/aws/iot/websockets/BasicMqttOverWebsocketsProvider.java

fn calc_signature(date_stamp: &str, secret_key: &str, region: &str, msg: &str) -> String {
    let k_secret = format!("AWS4{}", secret_key);
    let k_date = sign(k_secret.as_bytes(), date_stamp);
    let k_region = sign(&k_date, region);
    let k_service = sign(&k_region, SERVICE);
    let k_signing = sign(&k_service, "aws4_request");
    hex::encode(sign(&k_signing, msg))
}

/// Everything needed to produce one signed `wss://` URL for the IoT Core
/// MQTT-over-WebSocket endpoint (§4.1).
pub struct SignRequest<'a> {
    pub endpoint_host: &'a str,
    pub region: &'a str,
    pub credentials: &'a Credentials,
    pub clock: &'a SkewCorrectedClock,
}

struct Builder<'a> {
    request: &'a SignRequest<'a>,
    timestamp: Timestamp,
}

impl<'a> Builder<'a> {
    fn new(request: &'a SignRequest<'a>) -> Self {
        Builder {
            request,
            timestamp: Timestamp::new(request.clock),
        }
    }

    fn scope(&self) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            self.timestamp.date_stamp(),
            self.request.region,
            SERVICE
        )
    }

    fn credential(&self) -> String {
        format!("{}/{}", self.request.credentials.access_key, self.scope())
    }

    fn canonical_query(&self) -> String {
        let pairs = vec![
            (X_AMZ_ALGORITHM, AWS4_HMAC_SHA256.to_string()),
            (X_AMZ_CREDENTIAL, self.credential()),
            (X_AMZ_DATE, self.timestamp.x_amz_date()),
            (X_AMZ_SIGNED_HEADERS, SIGNED_HEADERS.to_string()),
        ];
        merge(
            pairs
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, encode_uri(&v)))
                .collect(),
            "&",
        )
    }

    fn signature(&self) -> String {
        let canonical_request = format!(
            "{method}\n{uri}\n{query}\nhost:{host}\n\nhost\n{body_hash}",
            method = METHOD,
            uri = PATH,
            query = self.canonical_query(),
            host = self.request.endpoint_host,
            body_hash = hash(""),
        );

        let string_to_sign = format!(
            "{algorithm}\n{timestamp}\n{scope}\n{hash}",
            algorithm = AWS4_HMAC_SHA256,
            timestamp = self.timestamp.x_amz_date(),
            scope = self.scope(),
            hash = hash(&canonical_request)
        );

        calc_signature(
            &self.timestamp.date_stamp(),
            &self.request.credentials.secret_key,
            self.request.region,
            &string_to_sign,
        )
    }
}

/// Produces the signed `wss://<host>/mqtt?...` URL described in §4.1.
/// Pure and deterministic given identical `request` and clock reading.
pub fn sign_websocket_url(request: &SignRequest) -> Result<String> {
    let url = format!("wss://{}{}", request.endpoint_host, PATH);
    Url::parse(&url).map_err(|e| ClientError::Signing(e.to_string()))?;

    let builder = Builder::new(request);
    let query = builder.canonical_query();
    let signature = builder.signature();

    let mut full = format!("{}?{}", url, query);
    if let Some(token) = &request.credentials.session_token {
        full.push_str(&format!("&{}={}", X_AMZ_SECURITY_TOKEN, encode_uri(token)));
    }
    full.push_str(&format!("&{}={}", X_AMZ_SIGNATURE, signature));

    Ok(full)
}

/// Builds the `tungstenite` client handshake request for the signed URL,
/// with the `mqttv3.1` subprotocol and `Host` header set as IoT Core expects.
pub fn mqtt_over_websockets_request(request: &SignRequest) -> Result<Request> {
    let signed_url = sign_websocket_url(request)?;

    let mut req = signed_url
        .into_client_request()
        .map_err(|e| ClientError::Signing(e.to_string()))?;

    let headers = req.headers_mut();
    headers.insert(
        HOST,
        request
            .endpoint_host
            .parse()
            .map_err(|_| ClientError::Signing("invalid host header".into()))?,
    );
    headers.insert(
        "sec-websocket-protocol",
        SUBPROTOCOL
            .parse()
            .map_err(|_| ClientError::Signing("invalid subprotocol".into()))?,
    );

    Ok(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn fixture<'a>(credentials: &'a Credentials, clock: &'a SkewCorrectedClock) -> SignRequest<'a> {
        SignRequest {
            endpoint_host: "example.iot.us-east-1.amazonaws.com",
            region: "us-east-1",
            credentials,
            clock,
        }
    }

    fn fixed_clock() -> SkewCorrectedClock {
        let clock = SkewCorrectedClock::new();
        clock.correct_against(Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap());
        clock
    }

    #[test]
    fn sign_websocket_url_is_deterministic_for_identical_inputs() {
        let credentials = Credentials {
            access_key: "AKIDEXAMPLE".into(),
            secret_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".into(),
            session_token: None,
        };
        let clock = fixed_clock();
        let request = fixture(&credentials, &clock);

        let a = sign_websocket_url(&request).unwrap();
        let b = sign_websocket_url(&request).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sign_websocket_url_orders_query_parameters_as_specified() {
        let credentials = Credentials {
            access_key: "AKIDEXAMPLE".into(),
            secret_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".into(),
            session_token: None,
        };
        let clock = fixed_clock();
        let url = sign_websocket_url(&fixture(&credentials, &clock)).unwrap();

        assert!(url.starts_with("wss://example.iot.us-east-1.amazonaws.com/mqtt?"));
        let algo_pos = url.find("X-Amz-Algorithm=").unwrap();
        let cred_pos = url.find("X-Amz-Credential=").unwrap();
        let date_pos = url.find("X-Amz-Date=").unwrap();
        let signed_pos = url.find("X-Amz-SignedHeaders=").unwrap();
        let sig_pos = url.find("X-Amz-Signature=").unwrap();
        assert!(algo_pos < cred_pos && cred_pos < date_pos && date_pos < signed_pos && signed_pos < sig_pos);
        assert!(!url.contains("X-Amz-Security-Token"));
    }

    #[test]
    fn session_token_is_appended_between_query_and_signature_param() {
        let credentials = Credentials {
            access_key: "AKIDEXAMPLE".into(),
            secret_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".into(),
            session_token: Some("the/token=".into()),
        };
        let clock = fixed_clock();
        let url = sign_websocket_url(&fixture(&credentials, &clock)).unwrap();

        let token_pos = url.find("X-Amz-Security-Token=").unwrap();
        let sig_pos = url.find("X-Amz-Signature=").unwrap();
        assert!(token_pos < sig_pos);
    }

    #[test]
    fn mqtt_over_websockets_request_carries_subprotocol_and_host_headers() {
        let credentials = Credentials {
            access_key: "AKIDEXAMPLE".into(),
            secret_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".into(),
            session_token: None,
        };
        let clock = fixed_clock();
        let req = mqtt_over_websockets_request(&fixture(&credentials, &clock)).unwrap();

        assert_eq!(
            req.headers().get(HOST).unwrap(),
            "example.iot.us-east-1.amazonaws.com"
        );
        assert_eq!(
            req.headers().get("sec-websocket-protocol").unwrap(),
            "mqttv3.1"
        );
    }
}
