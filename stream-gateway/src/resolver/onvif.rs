// ONVIF 设备发现客户端
//
// 只实现取流需要的三个调用：GetCapabilities（找媒体服务地址）、
// GetProfiles、GetStreamUri。认证使用 WS-Security UsernameToken 摘要。

use super::{DeviceEndpoint, DiscoveryClient, MediaProfile};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{SecondsFormat, Utc};
use common::{GatewayError, Result};
use dashmap::DashMap;
use regex::Regex;
use sha1::{Digest, Sha1};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

const DEVICE_SERVICE_PATH: &str = "/onvif/device_service";
const MEDIA_SERVICE_PATH: &str = "/onvif/media_service";

#[derive(Clone)]
pub struct OnvifClient {
    http: reqwest::Client,
    /// host:port -> 媒体服务地址
    media_services: std::sync::Arc<DashMap<String, String>>,
}

impl OnvifClient {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        // 摄像头都在内网，不走系统代理
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .no_proxy()
            .build()
            .map_err(|e| GatewayError::Resolution(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            media_services: std::sync::Arc::new(DashMap::new()),
        })
    }

    async fn call(&self, url: &str, device: &DeviceEndpoint, body: &str) -> Result<String> {
        let envelope = envelope(&device.account, &device.password, body);
        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/soap+xml; charset=utf-8")
            .body(envelope)
            .send()
            .await
            .map_err(|e| GatewayError::Resolution(format!("ONVIF request to {} failed: {}", url, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Resolution(format!("ONVIF response from {} unreadable: {}", url, e)))?;

        if !status.is_success() {
            let reason = fault_reason(&text).unwrap_or_else(|| status.to_string());
            return Err(GatewayError::Resolution(format!(
                "ONVIF call to {} failed: {}",
                url, reason
            )));
        }
        Ok(text)
    }

    async fn media_service(&self, device: &DeviceEndpoint) -> Result<String> {
        let key = format!("{}:{}", device.host, device.port);
        if let Some(url) = self.media_services.get(&key) {
            return Ok(url.value().clone());
        }

        let device_url = format!("http://{}{}", key, DEVICE_SERVICE_PATH);
        let url = match self.call(&device_url, device, GET_CAPABILITIES).await {
            Ok(body) => media_xaddr(&body),
            Err(e) => {
                debug!("GetCapabilities on {} failed: {}", key, e);
                None
            }
        }
        .unwrap_or_else(|| format!("http://{}{}", key, MEDIA_SERVICE_PATH));

        self.media_services.insert(key, url.clone());
        Ok(url)
    }
}

#[async_trait]
impl DiscoveryClient for OnvifClient {
    async fn profiles(&self, device: &DeviceEndpoint) -> Result<Vec<MediaProfile>> {
        let url = self.media_service(device).await?;
        let body = self.call(&url, device, GET_PROFILES).await?;
        Ok(parse_profiles(&body))
    }

    async fn stream_uri(&self, device: &DeviceEndpoint, profile_token: &str) -> Result<String> {
        let url = self.media_service(device).await?;
        let request = GET_STREAM_URI.replace("{token}", &xml_escape(profile_token));
        let body = self.call(&url, device, &request).await?;
        parse_stream_uri(&body).ok_or_else(|| {
            GatewayError::Resolution(format!("No stream URI in response from {}", device.host))
        })
    }
}

const GET_CAPABILITIES: &str = r#"<GetCapabilities xmlns="http://www.onvif.org/ver10/device/wsdl"><Category>Media</Category></GetCapabilities>"#;

const GET_PROFILES: &str = r#"<GetProfiles xmlns="http://www.onvif.org/ver10/media/wsdl"/>"#;

const GET_STREAM_URI: &str = r#"<GetStreamUri xmlns="http://www.onvif.org/ver10/media/wsdl"><StreamSetup><Stream xmlns="http://www.onvif.org/ver10/schema">RTP-Unicast</Stream><Transport xmlns="http://www.onvif.org/ver10/schema"><Protocol>RTSP</Protocol></Transport></StreamSetup><ProfileToken>{token}</ProfileToken></GetStreamUri>"#;

fn envelope(account: &str, password: &str, body: &str) -> String {
    let nonce: [u8; 16] = rand::random();
    let created = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let digest = password_digest(&nonce, &created, password);

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">"#,
            r#"<s:Header><Security s:mustUnderstand="1" xmlns="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd">"#,
            r#"<UsernameToken><Username>{}</Username>"#,
            r#"<Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest">{}</Password>"#,
            r#"<Nonce EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary">{}</Nonce>"#,
            r#"<Created xmlns="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">{}</Created>"#,
            r#"</UsernameToken></Security></s:Header>"#,
            r#"<s:Body>{}</s:Body></s:Envelope>"#
        ),
        xml_escape(account),
        digest,
        STANDARD.encode(nonce),
        created,
        body
    )
}

/// Base64(SHA1(nonce + created + password))
fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    STANDARD.encode(hasher.finalize())
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static ONVIF pattern"))
}

fn media_xaddr(body: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?s)<(?:\w+:)?Media>.*?<(?:\w+:)?XAddr>\s*([^<\s]+)\s*</")
        .captures(body)
        .map(|c| xml_unescape(&c[1]))
}

fn parse_profiles(body: &str) -> Vec<MediaProfile> {
    static OPEN: OnceLock<Regex> = OnceLock::new();
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    static NAME: OnceLock<Regex> = OnceLock::new();

    let open_re = regex(&OPEN, r"<(?:\w+:)?Profiles\b([^>]*)>");
    let token_re = regex(&TOKEN, r#"\btoken="([^"]*)""#);
    let name_re = regex(&NAME, r"<(?:\w+:)?Name>([^<]*)</");

    let openings: Vec<_> = open_re.captures_iter(body).collect();
    openings
        .iter()
        .enumerate()
        .filter_map(|(i, caps)| {
            let whole = caps.get(0)?;
            let token = token_re.captures(&caps[1])?[1].to_string();
            let end = openings
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(body.len());
            let name = name_re
                .captures(&body[whole.end()..end])
                .map(|c| xml_unescape(&c[1]))
                .unwrap_or_default();
            Some(MediaProfile {
                name,
                token: xml_unescape(&token),
            })
        })
        .collect()
}

fn parse_stream_uri(body: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"<(?:\w+:)?Uri>\s*([^<\s]+)\s*</")
        .captures(body)
        .map(|c| xml_unescape(&c[1]))
}

fn fault_reason(body: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"<(?:\w+:)?Text[^>]*>([^<]+)</")
        .captures(body)
        .map(|c| c[1].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const PROFILES_RESPONSE: &str = r#"<?xml version="1.0"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://www.w3.org/2003/05/soap-envelope" xmlns:trt="http://www.onvif.org/ver10/media/wsdl" xmlns:tt="http://www.onvif.org/ver10/schema">
<SOAP-ENV:Body><trt:GetProfilesResponse>
<trt:Profiles token="Profile_1" fixed="true"><tt:Name>mainStream</tt:Name>
<tt:VideoSourceConfiguration token="VideoSource_1"><tt:Name>VideoSourceConfig</tt:Name></tt:VideoSourceConfiguration></trt:Profiles>
<trt:Profiles token="Profile_2" fixed="true"><tt:Name>quality_h264</tt:Name></trt:Profiles>
</trt:GetProfilesResponse></SOAP-ENV:Body></SOAP-ENV:Envelope>"#;

    const STREAM_URI_RESPONSE: &str = r#"<SOAP-ENV:Envelope><SOAP-ENV:Body><trt:GetStreamUriResponse><trt:MediaUri>
<tt:Uri>rtsp://10.0.0.9:554/Streaming/Channels/101?transportmode=unicast&amp;profile=Profile_2</tt:Uri>
<tt:InvalidAfterConnect>false</tt:InvalidAfterConnect></trt:MediaUri></trt:GetStreamUriResponse></SOAP-ENV:Body></SOAP-ENV:Envelope>"#;

    #[test]
    fn test_parse_profiles() {
        let profiles = parse_profiles(PROFILES_RESPONSE);
        assert_eq!(
            profiles,
            vec![
                MediaProfile { name: "mainStream".into(), token: "Profile_1".into() },
                MediaProfile { name: "quality_h264".into(), token: "Profile_2".into() },
            ]
        );
    }

    #[test]
    fn test_parse_stream_uri_unescapes() {
        assert_eq!(
            parse_stream_uri(STREAM_URI_RESPONSE).unwrap(),
            "rtsp://10.0.0.9:554/Streaming/Channels/101?transportmode=unicast&profile=Profile_2"
        );
        assert!(parse_stream_uri("<Envelope/>").is_none());
    }

    #[test]
    fn test_media_xaddr() {
        let body = r#"<tds:Capabilities><tt:Analytics><tt:XAddr>http://x/analytics</tt:XAddr></tt:Analytics>
<tt:Media><tt:XAddr>http://10.0.0.9/onvif/Media</tt:XAddr></tt:Media></tds:Capabilities>"#;
        assert_eq!(media_xaddr(body).unwrap(), "http://10.0.0.9/onvif/Media");
    }

    #[test]
    fn test_password_digest_known_vector() {
        // ONVIF Application Programmer's Guide 示例
        let nonce = STANDARD.decode("LKqI6G/AikKCQrN0zqZFlg==").unwrap();
        let digest = password_digest(&nonce, "2010-09-16T07:50:45Z", "userpassword");
        assert_eq!(digest, "tuOSpGlFlIXsozq4HFNeeGeFLEI=");
    }

    #[test]
    fn test_envelope_escapes_username() {
        let xml = envelope("a<b", "pw", GET_PROFILES);
        assert!(xml.contains("<Username>a&lt;b</Username>"));
        assert!(xml.contains("<GetProfiles"));
        assert!(!xml.contains("pw<"));
    }

    #[test]
    fn test_fault_reason() {
        let body = r#"<s:Fault><s:Reason><s:Text xml:lang="en">Sender not Authorized</s:Text></s:Reason></s:Fault>"#;
        assert_eq!(fault_reason(body).unwrap(), "Sender not Authorized");
    }

    #[derive(Clone)]
    struct MockDevice {
        base: Arc<std::sync::Mutex<String>>,
        capability_calls: Arc<AtomicUsize>,
    }

    async fn device_service(State(device): State<MockDevice>, _body: Bytes) -> String {
        device.capability_calls.fetch_add(1, Ordering::SeqCst);
        let base = device.base.lock().unwrap().clone();
        format!(
            "<tds:GetCapabilitiesResponse><tt:Media><tt:XAddr>{}/onvif/Media</tt:XAddr></tt:Media></tds:GetCapabilitiesResponse>",
            base
        )
    }

    async fn media_service(body: Bytes) -> (StatusCode, String) {
        let request = String::from_utf8_lossy(&body);
        if !request.contains("PasswordDigest") {
            return (StatusCode::BAD_REQUEST, "<s:Text>missing token</s:Text>".to_string());
        }
        if request.contains("<GetProfiles") {
            (StatusCode::OK, PROFILES_RESPONSE.to_string())
        } else if request.contains("<ProfileToken>Profile_2</ProfileToken>") {
            (StatusCode::OK, STREAM_URI_RESPONSE.to_string())
        } else {
            (StatusCode::BAD_REQUEST, "<s:Text>No such profile</s:Text>".to_string())
        }
    }

    #[tokio::test]
    async fn test_client_against_mock_device() {
        let device = MockDevice {
            base: Arc::new(std::sync::Mutex::new(String::new())),
            capability_calls: Arc::new(AtomicUsize::new(0)),
        };
        let app = Router::new()
            .route("/onvif/device_service", post(device_service))
            .route("/onvif/Media", post(media_service))
            .with_state(device.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        *device.base.lock().unwrap() = format!("http://{}", addr);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = OnvifClient::new(Duration::from_secs(5)).unwrap();
        let endpoint = DeviceEndpoint {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            account: "admin".to_string(),
            password: "p@ss".to_string(),
        };

        let profiles = client.profiles(&endpoint).await.unwrap();
        assert_eq!(profiles.len(), 2);

        let uri = client.stream_uri(&endpoint, "Profile_2").await.unwrap();
        assert!(uri.starts_with("rtsp://10.0.0.9:554/"));

        let err = client.stream_uri(&endpoint, "Profile_9").await.unwrap_err();
        assert!(err.to_string().contains("No such profile"));

        // 媒体服务地址只查询一次
        assert_eq!(device.capability_calls.load(Ordering::SeqCst), 1);
    }
}
