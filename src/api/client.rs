use std::collections::BTreeMap;
use std::time::Duration;

use log::{debug, warn};
use reqwest::{Client as HttpClient, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::api::models::{
    contacts_from_map, AuthEnvelope, Avatar, ConnectOptions, ConnectReply, Contact, CreateRole, CreateSender,
    CreateUser, LoginRequest, QrEnvelope, QrReply, RawContact, Role, Sender, StatusEnvelope, StatusReply, User,
};
use crate::contacts::phone_from_jid;
use crate::error::{ApiError, ApiResult};
use crate::pairing::SessionBackend;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error body the backend attaches to non-success responses.
#[derive(Debug, Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// REST client for the buzz backend. Keeps the session cookie issued by login.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: HttpClient,
    base: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> ApiResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> ApiResult<Self> {
        let mut normalized = crate::utils::normalize_url(base_url);
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base = Url::parse(&normalized)?;
        let http = HttpClient::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .map_err(ApiError::Unavailable)?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> ApiResult<Url> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    fn with_token(req: RequestBuilder, token: &str) -> RequestBuilder {
        req.header("token", token)
    }

    fn is_blank(token: &str) -> bool {
        token.trim().is_empty()
    }

    async fn checked(req: RequestBuilder) -> ApiResult<reqwest::Response> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        let body = resp.text().await.unwrap_or_default();
        let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
        Err(ApiError::Http {
            status: status.as_u16(),
            title: parsed.title.unwrap_or_else(|| "Oops, something went wrong!".into()),
            message: parsed.message.unwrap_or(body),
        })
    }

    async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> ApiResult<T> {
        let resp = Self::checked(req).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn send_empty(req: RequestBuilder) -> ApiResult<()> {
        Self::checked(req).await?;
        Ok(())
    }

    pub async fn login(&self, username: &str, password: &str) -> ApiResult<User> {
        let url = self.endpoint("/api/v1/auth/login")?;
        debug!("POST {url}");
        let env: AuthEnvelope<User> = Self::send_json(
            self.http.post(url).json(&LoginRequest { username, password }),
        )
        .await?;
        env.data.ok_or(ApiError::Unauthorized)
    }

    /// Returns the user bound to the current session cookie.
    pub async fn identify(&self) -> ApiResult<User> {
        let url = self.endpoint("/api/v1/auth/identify")?;
        debug!("GET {url}");
        let env: AuthEnvelope<User> = Self::send_json(self.http.get(url)).await?;
        env.data.ok_or(ApiError::Unauthorized)
    }

    pub async fn senders(&self) -> ApiResult<Vec<Sender>> {
        let url = self.endpoint("/api/v1/whatsapp/users")?;
        debug!("GET {url}");
        let list: Option<Vec<Sender>> = Self::send_json(self.http.get(url)).await?;
        Ok(list.unwrap_or_default())
    }

    pub async fn sender(&self, id: i64) -> ApiResult<Sender> {
        let url = self.endpoint(&format!("/api/v1/whatsapp/user/{id}"))?;
        debug!("GET {url}");
        Self::send_json(self.http.get(url)).await
    }

    pub async fn create_sender(&self, sender: &CreateSender) -> ApiResult<()> {
        sender.validate().map_err(ApiError::InvalidRequest)?;
        let url = self.endpoint("/api/v1/whatsapp/create-user")?;
        debug!("POST {url}");
        Self::send_empty(self.http.post(url).json(sender)).await
    }

    pub async fn update_sender(&self, sender: &Sender) -> ApiResult<()> {
        let id = sender
            .id
            .ok_or_else(|| ApiError::InvalidRequest("Sender has no id".into()))?;
        let url = self.endpoint(&format!("/api/v1/whatsapp/update-user/{id}"))?;
        debug!("PUT {url}");
        Self::send_empty(self.http.put(url).json(sender)).await
    }

    pub async fn delete_sender(&self, id: i64) -> ApiResult<()> {
        let url = self.endpoint(&format!("/api/v1/whatsapp/delete-user/{id}"))?;
        debug!("DELETE {url}");
        Self::send_empty(self.http.delete(url)).await
    }

    pub async fn status(&self, token: &str) -> ApiResult<Option<StatusReply>> {
        if Self::is_blank(token) {
            return Ok(None);
        }
        let url = self.endpoint("/api/v1/whatsapp/status")?;
        debug!("GET {url}");
        let env: StatusEnvelope = Self::send_json(Self::with_token(self.http.get(url), token)).await?;
        Ok(Some(env.into()))
    }

    pub async fn connect(&self, token: &str, options: &ConnectOptions) -> ApiResult<Option<ConnectReply>> {
        if Self::is_blank(token) {
            return Ok(None);
        }
        let url = self.endpoint("/api/v1/whatsapp/connect")?;
        debug!("POST {url}");
        let reply = Self::send_json(Self::with_token(self.http.post(url).json(options), token)).await?;
        Ok(Some(reply))
    }

    pub async fn qr(&self, token: &str) -> ApiResult<Option<QrReply>> {
        if Self::is_blank(token) {
            return Ok(None);
        }
        let url = self.endpoint("/api/v1/whatsapp/qr")?;
        debug!("GET {url}");
        let env: QrEnvelope = Self::send_json(Self::with_token(self.http.get(url), token)).await?;
        Ok(Some(env.into()))
    }

    /// Address book of the live session. `None` when the token is blank or the
    /// backend answers with something other than a jid map.
    pub async fn contacts(&self, token: &str) -> ApiResult<Option<Vec<Contact>>> {
        if Self::is_blank(token) {
            return Ok(None);
        }
        let url = self.endpoint("/api/v1/whatsapp/contacts")?;
        debug!("POST {url}");
        let body = serde_json::json!({});
        let json: Value = Self::send_json(Self::with_token(self.http.post(url).json(&body), token)).await?;
        if json.is_null() {
            return Ok(None);
        }
        match serde_json::from_value::<BTreeMap<String, RawContact>>(json) {
            Ok(map) => Ok(Some(contacts_from_map(map))),
            Err(e) => {
                warn!("Unexpected contacts payload: {e}");
                Ok(None)
            }
        }
    }

    pub async fn avatar(&self, token: &str, jid: &str) -> ApiResult<Avatar> {
        if Self::is_blank(token) {
            return Err(ApiError::InvalidRequest("Token is required".into()));
        }
        let phone = phone_from_jid(jid).ok_or_else(|| ApiError::InvalidRequest("Invalid phone number".into()))?;
        let url = self.endpoint("/api/v1/whatsapp/avatar")?;
        debug!("POST {url}");
        let body = serde_json::json!({ "phone": phone });
        Self::send_json(Self::with_token(self.http.post(url).json(&body), token)).await
    }

    /// Downloads a picture the backend linked to, such as an avatar URL.
    pub async fn image(&self, url: &str) -> ApiResult<Vec<u8>> {
        let url = Url::parse(url)?;
        debug!("GET {url}");
        let resp = Self::checked(self.http.get(url)).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    pub async fn users(&self) -> ApiResult<Vec<User>> {
        let url = self.endpoint("/api/v1/user/get-all")?;
        debug!("GET {url}");
        let list: Option<Vec<User>> = Self::send_json(self.http.get(url)).await?;
        Ok(list.unwrap_or_default())
    }

    pub async fn create_user(&self, user: &CreateUser) -> ApiResult<()> {
        let url = self.endpoint("/api/v1/user/create")?;
        debug!("POST {url}");
        Self::send_empty(self.http.post(url).json(user)).await
    }

    pub async fn update_user(&self, id: i64, user: &CreateUser) -> ApiResult<()> {
        let url = self.endpoint(&format!("/api/v1/user/update/{id}"))?;
        debug!("PUT {url}");
        Self::send_empty(self.http.put(url).json(user)).await
    }

    pub async fn delete_user(&self, id: i64) -> ApiResult<()> {
        let url = self.endpoint(&format!("/api/v1/user/delete/{id}"))?;
        debug!("DELETE {url}");
        Self::send_empty(self.http.delete(url)).await
    }

    pub async fn roles(&self) -> ApiResult<Vec<Role>> {
        let url = self.endpoint("/api/v1/role/get-all")?;
        debug!("GET {url}");
        let list: Option<Vec<Role>> = Self::send_json(self.http.get(url)).await?;
        Ok(list.unwrap_or_default())
    }

    pub async fn create_role(&self, role: &CreateRole) -> ApiResult<()> {
        let url = self.endpoint("/api/v1/role/create")?;
        debug!("POST {url}");
        Self::send_empty(self.http.post(url).json(role)).await
    }

    pub async fn update_role(&self, id: i64, role: &CreateRole) -> ApiResult<()> {
        let url = self.endpoint(&format!("/api/v1/role/update/{id}"))?;
        debug!("PUT {url}");
        Self::send_empty(self.http.put(url).json(role)).await
    }

    pub async fn delete_role(&self, id: i64) -> ApiResult<()> {
        let url = self.endpoint(&format!("/api/v1/role/delete/{id}"))?;
        debug!("DELETE {url}");
        Self::send_empty(self.http.delete(url)).await
    }
}

impl SessionBackend for ApiClient {
    async fn status(&self, token: &str) -> ApiResult<Option<StatusReply>> {
        ApiClient::status(self, token).await
    }

    async fn connect(&self, token: &str, options: &ConnectOptions) -> ApiResult<Option<ConnectReply>> {
        ApiClient::connect(self, token, options).await
    }

    async fn qr(&self, token: &str) -> ApiResult<Option<QrReply>> {
        ApiClient::qr(self, token).await
    }

    async fn contacts(&self, token: &str) -> ApiResult<Option<Vec<Contact>>> {
        ApiClient::contacts(self, token).await
    }
}
