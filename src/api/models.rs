use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A managed messaging account as returned by the sender endpoints.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Sender {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub token: String,
    pub webhook: String,
    /// Remote session identifier, assigned once the sender is paired.
    pub jid: String,
    pub qrcode: String,
    pub connected: Option<i64>,
    pub expiration: Option<i64>,
    pub events: String,
}

impl Sender {
    pub fn is_connected(&self) -> bool {
        self.connected.unwrap_or(0) == 1
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CreateSender {
    pub name: String,
    pub token: String,
}

impl CreateSender {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Name is required".into());
        }
        if self.token.trim().is_empty() {
            return Err("Token is required".into());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatus {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub logged_in: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatusEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<SessionStatus>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    NoSession,
    Unauthorized,
    Other(String),
}

impl SessionFailure {
    pub fn classify(error: &str) -> Self {
        match error {
            "no session" => SessionFailure::NoSession,
            "Unauthorized" => SessionFailure::Unauthorized,
            other => SessionFailure::Other(other.to_string()),
        }
    }
}

/// Decoded answer of the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReply {
    Session(SessionStatus),
    Failed(SessionFailure),
}

impl From<StatusEnvelope> for StatusReply {
    fn from(env: StatusEnvelope) -> Self {
        match (env.success, env.data) {
            (true, Some(status)) => StatusReply::Session(status),
            (true, None) => StatusReply::Failed(SessionFailure::Other("missing status data".into())),
            (false, _) => {
                let error = env.error.or(env.message).unwrap_or_default();
                StatusReply::Failed(SessionFailure::classify(&error))
            }
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct ConnectOptions {
    pub events: String,
    pub immediate: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self { events: "All".into(), immediate: true }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ConnectReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QrEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub qrcode: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Decoded answer of the QR endpoint. An empty code means "not ready yet".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrReply {
    Code(String),
    Failed(String),
}

impl From<QrEnvelope> for QrReply {
    fn from(env: QrEnvelope) -> Self {
        if env.success {
            QrReply::Code(env.qrcode.unwrap_or_default())
        } else {
            QrReply::Failed(env.error.unwrap_or_default())
        }
    }
}

/// Address book entry as the backend sends it, keyed by jid.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawContact {
    pub found: bool,
    pub first_name: String,
    pub full_name: String,
    pub push_name: String,
    pub business_name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Contact {
    pub jid: String,
    pub found: bool,
    pub first_name: String,
    pub full_name: String,
    pub push_name: String,
    pub business_name: String,
}

pub fn contacts_from_map(map: BTreeMap<String, RawContact>) -> Vec<Contact> {
    map.into_iter()
        .map(|(jid, raw)| Contact {
            jid,
            found: raw.found,
            first_name: raw.first_name,
            full_name: raw.full_name,
            push_name: raw.push_name,
            business_name: raw.business_name,
        })
        .collect()
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Avatar {
    #[serde(rename = "URL", default)]
    pub url: String,
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "DirectPath", default)]
    pub direct_path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    pub confirmed: Option<bool>,
    pub whatsapp: Option<String>,
    pub email: Option<String>,
    pub role_id: Option<i64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub deleted_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CreateUser {
    pub name: String,
    pub username: String,
    /// Left out of the request when blank, which keeps the stored password on update.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<i64>,
}

impl CreateUser {
    /// A new account needs a password; an edit may leave it blank.
    pub fn validate(&self, creating: bool) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Name is required".into());
        }
        if self.username.trim().is_empty() {
            return Err("Username is required".into());
        }
        if creating && self.password.is_empty() {
            return Err("Password is required".into());
        }
        Ok(())
    }
}

impl From<&User> for CreateUser {
    fn from(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            username: user.username.clone(),
            password: String::new(),
            confirmed: user.confirmed,
            whatsapp: user.whatsapp.clone(),
            email: user.email.clone(),
            role_id: user.role_id,
        }
    }
}

impl User {
    /// Menu permissions of this user's role, if the role is among `roles`.
    pub fn menu_actions(&self, roles: &[Role]) -> Option<RoleActions> {
        let role_id = self.role_id?;
        roles
            .iter()
            .find(|role| role.id == Some(role_id))
            .and_then(|role| role.menu_actions().ok())
    }
}

/// Menu permissions granted by a role.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RoleActions {
    pub menu_dashboard: bool,
    pub menu_sender: bool,
    pub menu_config_user: bool,
    pub menu_config_role: bool,
    pub menu_system_flag: bool,
    pub menu_system_log: bool,
    pub menu_system_setting: bool,
}

impl RoleActions {
    pub fn flags(&self) -> [(&'static str, bool); 7] {
        [
            ("Dashboard", self.menu_dashboard),
            ("Senders", self.menu_sender),
            ("Users", self.menu_config_user),
            ("Roles", self.menu_config_role),
            ("System flags", self.menu_system_flag),
            ("System log", self.menu_system_log),
            ("System settings", self.menu_system_setting),
        ]
    }

    /// Sets the flag at `index` in [`RoleActions::flags`] order.
    pub fn set_flag(&mut self, index: usize, value: bool) {
        let slot = match index {
            0 => &mut self.menu_dashboard,
            1 => &mut self.menu_sender,
            2 => &mut self.menu_config_user,
            3 => &mut self.menu_config_role,
            4 => &mut self.menu_system_flag,
            5 => &mut self.menu_system_log,
            6 => &mut self.menu_system_setting,
            _ => return,
        };
        *slot = value;
    }

    pub fn can_configure(&self) -> bool {
        self.menu_config_user || self.menu_config_role
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Role {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    /// JSON-encoded [`RoleActions`].
    pub actions: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub deleted_at: Option<String>,
}

impl Role {
    pub fn menu_actions(&self) -> Result<RoleActions, serde_json::Error> {
        if self.actions.trim().is_empty() {
            return Ok(RoleActions::default());
        }
        serde_json::from_str(&self.actions)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CreateRole {
    pub name: String,
    pub actions: Option<RoleActions>,
}

impl CreateRole {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Name is required".into());
        }
        Ok(())
    }
}

impl From<&Role> for CreateRole {
    fn from(role: &Role) -> Self {
        Self {
            name: role.name.clone(),
            actions: Some(role.menu_actions().unwrap_or_default()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct AuthEnvelope<T> {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_envelope_with_session_data() {
        let env: StatusEnvelope = serde_json::from_str(
            r#"{"success":true,"message":"success get status","data":{"connected":true,"logged_in":false}}"#,
        )
        .unwrap();
        assert_eq!(
            StatusReply::from(env),
            StatusReply::Session(SessionStatus { connected: true, logged_in: false })
        );
    }

    #[test]
    fn status_envelope_failures_are_classified() {
        let no_session: StatusEnvelope =
            serde_json::from_str(r#"{"success":false,"message":"failed to get status","error":"no session"}"#).unwrap();
        assert_eq!(StatusReply::from(no_session), StatusReply::Failed(SessionFailure::NoSession));

        let unauthorized: StatusEnvelope = serde_json::from_str(r#"{"success":false,"error":"Unauthorized"}"#).unwrap();
        assert_eq!(StatusReply::from(unauthorized), StatusReply::Failed(SessionFailure::Unauthorized));

        let other: StatusEnvelope = serde_json::from_str(r#"{"success":false,"error":"client not found"}"#).unwrap();
        assert_eq!(
            StatusReply::from(other),
            StatusReply::Failed(SessionFailure::Other("client not found".into()))
        );
    }

    #[test]
    fn success_without_data_is_not_a_session() {
        let env: StatusEnvelope = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(matches!(StatusReply::from(env), StatusReply::Failed(SessionFailure::Other(_))));
    }

    #[test]
    fn qr_envelope_keeps_empty_code() {
        let env: QrEnvelope = serde_json::from_str(r#"{"success":true,"qrcode":""}"#).unwrap();
        assert_eq!(QrReply::from(env), QrReply::Code(String::new()));
        let env: QrEnvelope =
            serde_json::from_str(r#"{"success":false,"message":"failed to get qrcode","error":"timeout"}"#).unwrap();
        assert_eq!(QrReply::from(env), QrReply::Failed("timeout".into()));
    }

    #[test]
    fn contacts_map_is_ordered_by_jid() {
        let map: BTreeMap<String, RawContact> = serde_json::from_str(
            r#"{
                "6282@s.whatsapp.net": {"Found": true, "FirstName": "Budi", "FullName": "Budi Santoso", "PushName": "budi", "BusinessName": ""},
                "6281@s.whatsapp.net": {"Found": false, "PushName": "ani"}
            }"#,
        )
        .unwrap();
        let contacts = contacts_from_map(map);
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].jid, "6281@s.whatsapp.net");
        assert_eq!(contacts[0].push_name, "ani");
        assert!(contacts[1].found);
        assert_eq!(contacts[1].full_name, "Budi Santoso");
    }

    #[test]
    fn sender_tolerates_nulls_and_missing_fields() {
        let sender: Sender = serde_json::from_str(
            r#"{"id":3,"name":"marketing","token":"abc","connected":1,"expiration":null}"#,
        )
        .unwrap();
        assert_eq!(sender.id, Some(3));
        assert!(sender.is_connected());
        assert!(sender.jid.is_empty());
    }

    #[test]
    fn create_sender_requires_name_and_token() {
        let mut form = CreateSender { name: " ".into(), token: "t".into() };
        assert_eq!(form.validate(), Err("Name is required".to_string()));
        form.name = "sales".into();
        form.token.clear();
        assert_eq!(form.validate(), Err("Token is required".to_string()));
        form.token = "t".into();
        assert!(form.validate().is_ok());
    }

    #[test]
    fn role_actions_decode_from_string_column() {
        let actions = RoleActions { menu_sender: true, menu_config_role: true, ..Default::default() };
        let role = Role {
            id: Some(1),
            name: "operator".into(),
            actions: serde_json::to_string(&actions).unwrap(),
            ..Default::default()
        };
        assert_eq!(role.menu_actions().unwrap(), actions);
        assert_eq!(Role::default().menu_actions().unwrap(), RoleActions::default());
    }

    #[test]
    fn user_password_is_not_sent_when_blank() {
        let user = User { id: Some(2), name: "Admin".into(), username: "admin".into(), ..Default::default() };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["username"], "admin");
    }

    #[test]
    fn avatar_uses_backend_field_names() {
        let avatar: Avatar =
            serde_json::from_str(r#"{"URL":"https://pps.example/1.jpg","ID":"99","Type":"image","DirectPath":"/v/1"}"#)
                .unwrap();
        assert_eq!(avatar.url, "https://pps.example/1.jpg");
        assert_eq!(avatar.kind, "image");
    }

    #[test]
    fn user_form_validation_depends_on_mode() {
        let user = User {
            id: Some(7),
            name: "Budi".into(),
            username: "budi".into(),
            role_id: Some(2),
            ..Default::default()
        };
        let form = CreateUser::from(&user);
        assert_eq!(form.role_id, Some(2));
        assert_eq!(form.validate(true), Err("Password is required".to_string()));
        assert!(form.validate(false).is_ok());
        assert!(serde_json::to_value(&form).unwrap().get("password").is_none());

        let blank = CreateUser { name: "x".into(), ..Default::default() };
        assert_eq!(blank.validate(false), Err("Username is required".to_string()));
    }

    #[test]
    fn user_permissions_come_from_matching_role() {
        let roles = vec![
            Role { id: Some(1), name: "admin".into(), actions: r#"{"menu_config_user":true}"#.into(), ..Default::default() },
            Role { id: Some(2), name: "operator".into(), actions: r#"{"menu_sender":true}"#.into(), ..Default::default() },
        ];
        let admin = User { role_id: Some(1), ..Default::default() };
        let operator = User { role_id: Some(2), ..Default::default() };
        assert!(admin.menu_actions(&roles).unwrap().can_configure());
        assert!(!operator.menu_actions(&roles).unwrap().can_configure());
        assert!(User::default().menu_actions(&roles).is_none());
    }

    #[test]
    fn role_flags_follow_setter_order() {
        let mut actions = RoleActions::default();
        for index in 0..actions.flags().len() {
            actions.set_flag(index, true);
        }
        assert!(actions.flags().iter().all(|(_, on)| *on));
        actions.set_flag(3, false);
        assert_eq!(actions.flags()[3], ("Roles", false));
        assert!(actions.can_configure());

        let role = Role { name: "ops".into(), actions: "not json".into(), ..Default::default() };
        let form = CreateRole::from(&role);
        assert_eq!(form.actions, Some(RoleActions::default()));
        assert!(form.validate().is_ok());
        assert!(CreateRole::default().validate().is_err());
    }
}
