//! Kite Connect REST adapter
//!
//! Form-encoded requests, `{status, data}` responses. Only the endpoints the
//! router and the order monitor need are covered.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::RwLock;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{AccessToken, BrokerGateway, Session};
use crate::config::KiteConfig;
use crate::domain::{ModifyParams, OrderParams, OrderRecord};
use crate::error::{BridgeError, Result};

const KITE_VERSION: &str = "3";

pub struct KiteClient {
    http: Client,
    rest_url: String,
    login_url: String,
    api_key: String,
    api_secret: Zeroizing<String>,
    access_token: RwLock<Option<AccessToken>>,
}

impl KiteClient {
    pub fn new(config: &KiteConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("X-Kite-Version", HeaderValue::from_static(KITE_VERSION));

        let http = Client::builder()
            .user_agent("kite-bridge/0.1")
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BridgeError::Internal(format!("failed to build Kite HTTP client: {}", e)))?;

        Ok(Self {
            http,
            rest_url: config.rest_url.trim_end_matches('/').to_string(),
            login_url: config.login_url.clone(),
            api_key: config.api_key.clone(),
            api_secret: Zeroizing::new(config.api_secret.clone()),
            access_token: RwLock::new(None),
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// `hex(sha256(api_key + request_token + api_secret))`
    pub fn checksum(&self, request_token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.api_key.as_bytes());
        hasher.update(request_token.as_bytes());
        hasher.update(self.api_secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn current_token(&self) -> Option<AccessToken> {
        self.access_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_token(&self, token: Option<AccessToken>) {
        *self.access_token.write().unwrap_or_else(|e| e.into_inner()) = token;
    }

    fn auth_header(&self) -> Result<HeaderValue> {
        let token = self.current_token().ok_or(BridgeError::Unauthenticated)?;
        let value = Zeroizing::new(format!("token {}:{}", self.api_key, token.expose()));
        let mut header = HeaderValue::from_str(&value)
            .map_err(|e| BridgeError::Internal(format!("invalid authorization header: {}", e)))?;
        header.set_sensitive(true);
        Ok(header)
    }

    async fn request<F: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        form: Option<&F>,
        authenticated: bool,
    ) -> Result<Value> {
        let mut req = self.http.request(method.clone(), self.url(path));

        if authenticated {
            req = req.header(AUTHORIZATION, self.auth_header()?);
        }
        if let Some(form) = form {
            req = req.form(form);
        }

        self.send(method, path, req).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.rest_url, path)
    }

    /// Send and unwrap the `{status, data}` envelope.
    ///
    /// `path` is only used in logs and errors; it must not carry credentials.
    async fn send(&self, method: Method, path: &str, req: RequestBuilder) -> Result<Value> {
        let resp = req.send().await.map_err(|e| {
            BridgeError::gateway(format!("{} {} failed: {}", method, path, e.without_url()))
        })?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| {
            BridgeError::gateway(format!(
                "{} {} body read failed: {}",
                method,
                path,
                e.without_url()
            ))
        })?;
        debug!("Kite {} {} -> {}", method, path, status);

        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| BridgeError::Gateway {
                status: Some(status.as_u16()),
                message: format!("invalid JSON from {} {}: {}", method, path, e),
            })?
        };

        let api_error = body.get("status").and_then(Value::as_str) == Some("error");
        if !status.is_success() || api_error {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} {} failed", method, path));

            if body.get("error_type").and_then(Value::as_str) == Some("TokenException") {
                warn!("Kite session rejected ({}); clearing access token", message);
                self.set_token(None);
            }

            return Err(BridgeError::Gateway {
                status: Some(status.as_u16()),
                message,
            });
        }

        Ok(body.get("data").cloned().unwrap_or(body))
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.request::<()>(Method::GET, path, None, true).await
    }
}

#[async_trait]
impl BrokerGateway for KiteClient {
    fn login_url(&self) -> String {
        format!("{}?v={}&api_key={}", self.login_url, KITE_VERSION, self.api_key)
    }

    fn is_authenticated(&self) -> bool {
        self.current_token().is_some()
    }

    async fn login(&self, request_token: &str) -> Result<Session> {
        let preview: String = request_token.chars().take(6).collect();
        info!("Logging in with request token {}...", preview);

        let checksum = self.checksum(request_token);
        let form = [
            ("api_key", self.api_key.as_str()),
            ("request_token", request_token),
            ("checksum", checksum.as_str()),
        ];
        let data = self
            .request(Method::POST, "/session/token", Some(&form), false)
            .await?;

        let token = data
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::gateway("login response carried no access_token"))?;
        let session = Session {
            user_id: data.get("user_id").and_then(Value::as_str).map(str::to_string),
            access_token: AccessToken::new(token),
        };

        self.set_token(Some(session.access_token.clone()));
        info!("Kite session established for {:?}", session.user_id);
        Ok(session)
    }

    async fn logout(&self) -> Result<()> {
        let Some(token) = self.current_token() else {
            return Ok(());
        };

        let path = "/session/token";
        let req = self
            .http
            .delete(self.url(path))
            .query(&[("api_key", self.api_key.as_str()), ("access_token", token.expose())]);
        if let Err(e) = self.send(Method::DELETE, path, req).await {
            warn!("Session invalidation failed, dropping token locally: {}", e);
        }

        self.set_token(None);
        Ok(())
    }

    async fn place_order(&self, params: &OrderParams) -> Result<Value> {
        self.request(Method::POST, "/orders/regular", Some(params), true)
            .await
    }

    async fn modify_order(&self, params: &ModifyParams) -> Result<Value> {
        let path = format!("/orders/regular/{}", params.order_id);
        self.request(Method::PUT, &path, Some(params), true).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<Value> {
        let path = format!("/orders/regular/{}", order_id);
        self.request::<()>(Method::DELETE, &path, None, true).await
    }

    async fn list_orders(&self) -> Result<Vec<OrderRecord>> {
        let data = self.get("/orders").await?;
        let Value::Array(entries) = data else {
            return Err(BridgeError::gateway("order book response is not a list"));
        };

        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<OrderRecord>(entry) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable order record: {}", e),
            }
        }
        Ok(records)
    }

    async fn get_holdings(&self) -> Result<Value> {
        self.get("/portfolio/holdings").await
    }

    async fn get_positions(&self) -> Result<Value> {
        self.get("/portfolio/positions").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderSide, OrderStatus, Validity};
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(rest_url: &str) -> KiteConfig {
        KiteConfig {
            api_key: "key123".to_string(),
            api_secret: "secret456".to_string(),
            redirect_url: "http://localhost".to_string(),
            rest_url: rest_url.to_string(),
            login_url: "https://kite.zerodha.com/connect/login".to_string(),
            request_timeout_ms: 2_000,
        }
    }

    async fn logged_in(server: &MockServer) -> KiteClient {
        Mock::given(method("POST"))
            .and(path("/session/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"user_id": "AB1234", "access_token": "tok789"}
            })))
            .mount(server)
            .await;
        let client = KiteClient::new(&config(&server.uri())).unwrap();
        client.login("reqtoken").await.unwrap();
        client
    }

    #[test]
    fn login_url_carries_api_key() {
        let client = KiteClient::new(&config("https://api.kite.trade")).unwrap();
        assert_eq!(
            client.login_url(),
            "https://kite.zerodha.com/connect/login?v=3&api_key=key123"
        );
        assert!(!client.is_authenticated());
    }

    #[test]
    fn checksum_is_sha256_of_key_token_secret() {
        let client = KiteClient::new(&config("https://api.kite.trade")).unwrap();
        let expected = hex::encode(Sha256::digest(b"key123reqtokensecret456"));
        assert_eq!(client.checksum("reqtoken"), expected);
        assert_eq!(expected.len(), 64);
    }

    #[tokio::test]
    async fn login_exchanges_request_token() {
        let server = MockServer::start().await;
        let client = KiteClient::new(&config(&server.uri())).unwrap();
        let checksum = client.checksum("reqtoken");

        Mock::given(method("POST"))
            .and(path("/session/token"))
            .and(header("X-Kite-Version", "3"))
            .and(body_string_contains(format!("checksum={checksum}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"user_id": "AB1234", "access_token": "tok789"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = client.login("reqtoken").await.unwrap();
        assert_eq!(session.access_token.expose(), "tok789");
        assert_eq!(session.user_id.as_deref(), Some("AB1234"));
        assert!(client.is_authenticated());
    }

    #[tokio::test]
    async fn calls_before_login_are_unauthenticated() {
        let server = MockServer::start().await;
        let client = KiteClient::new(&config(&server.uri())).unwrap();
        let err = client.get_holdings().await.unwrap_err();
        assert!(matches!(err, BridgeError::Unauthenticated));
    }

    #[tokio::test]
    async fn place_order_sends_form_with_authorization() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;

        Mock::given(method("POST"))
            .and(path("/orders/regular"))
            .and(header("Authorization", "token key123:tok789"))
            .and(body_string_contains("tradingsymbol=INFY"))
            .and(body_string_contains("validity=DAY"))
            .and(body_string_contains("transaction_type=BUY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"order_id": "151220000000000"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let params = OrderParams {
            tradingsymbol: "INFY".to_string(),
            exchange: "NSE".to_string(),
            transaction_type: OrderSide::Buy,
            order_type: "MARKET".to_string(),
            quantity: 10,
            product: "MIS".to_string(),
            price: Decimal::ZERO,
            trigger_price: Decimal::ZERO,
            validity: Validity::Day,
        };
        let data = client.place_order(&params).await.unwrap();
        assert_eq!(data["order_id"], "151220000000000");
    }

    #[tokio::test]
    async fn api_errors_become_gateway_errors() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;

        Mock::given(method("DELETE"))
            .and(path("/orders/regular/999"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "status": "error",
                "message": "Order cannot be cancelled as it is being processed.",
                "error_type": "InputException"
            })))
            .mount(&server)
            .await;

        match client.cancel_order("999").await.unwrap_err() {
            BridgeError::Gateway { status, message } => {
                assert_eq!(status, Some(400));
                assert!(message.contains("cannot be cancelled"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(client.is_authenticated());
    }

    #[tokio::test]
    async fn token_exception_drops_session() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;

        Mock::given(method("GET"))
            .and(path("/portfolio/positions"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "status": "error",
                "message": "Incorrect `api_key` or `access_token`.",
                "error_type": "TokenException"
            })))
            .mount(&server)
            .await;

        assert!(client.get_positions().await.is_err());
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn list_orders_skips_unreadable_records() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;

        Mock::given(method("GET"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": [
                    {"order_id": "1", "status": "OPEN", "tradingsymbol": "INFY"},
                    {"status": "OPEN"},
                    {"order_id": "2", "status": "COMPLETE"}
                ]
            })))
            .mount(&server)
            .await;

        let orders = client.list_orders().await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].status, OrderStatus::Open);
        assert_eq!(orders[1].order_id, "2");
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn logout_keeps_access_token_out_of_logs() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let server = MockServer::start().await;
        let client = logged_in(&server).await;

        Mock::given(method("DELETE"))
            .and(path("/session/token"))
            .and(query_param("api_key", "key123"))
            .and(query_param("access_token", "tok789"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "status": "error",
                "message": "Session invalidation failed"
            })))
            .expect(1)
            .mount(&server)
            .await;

        client.logout().await.unwrap();
        assert!(!client.is_authenticated());

        let output = logs.contents();
        assert!(output.contains("DELETE /session/token"), "{output}");
        assert!(!output.contains("tok789"), "{output}");
    }

    #[tokio::test]
    async fn logout_clears_token_even_if_invalidation_fails() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;

        Mock::given(method("DELETE"))
            .and(path("/session/token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        client.logout().await.unwrap();
        assert!(!client.is_authenticated());
    }
}
