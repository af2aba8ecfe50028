//! Account registration, login and logout.
//!
//! The API is tried first. When it cannot be reached and the local fallback
//! is enabled, a single development account kept in the `credentials` slot
//! stands in for the server (password stored as a SHA-256 digest).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, Envelope, Method};
use crate::kv::{KvStore, StoreError};
use crate::session::{self, normalize_email, User, CREDENTIALS_KEY};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid regex"));

/// Postal code after `normalize_cep`: `00000-000`
static CEP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{5}-\d{3}$").expect("Invalid regex"));

const MIN_PASSWORD_LEN: usize = 6;
const LOCAL_TOKEN: &str = "local-dev-token";

/// A validation error on a form field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid form: {}", join_fields(.0))]
    Invalid(Vec<FieldError>),
    #[error("you must accept the privacy terms (LGPD) to register")]
    ConsentRequired,
    #[error("wrong e-mail or password")]
    WrongCredentials,
    #[error("account not found")]
    AccountNotFound,
    #[error("e-mail already registered")]
    AlreadyRegistered,
    #[error("no local account found")]
    NoLocalAccount,
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Customer,
    Vendor,
}

#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    pub nome: String,
    pub email: String,
    pub senha: String,
    pub cep: String,
    pub consent: bool,
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email.trim())
}

/// Format a CEP from whatever the user typed: first 8 digits, `00000-000`.
pub fn normalize_cep(text: &str) -> String {
    let digits: String = text.chars().filter(char::is_ascii_digit).take(8).collect();
    if digits.len() > 5 {
        format!("{}-{}", &digits[..5], &digits[5..])
    } else {
        digits
    }
}

fn check_credentials(email: &str, senha: &str, errors: &mut Vec<FieldError>) {
    if !is_valid_email(email) {
        errors.push(FieldError {
            field: "email",
            message: "invalid e-mail address".to_string(),
        });
    }
    if senha.chars().count() < MIN_PASSWORD_LEN {
        errors.push(FieldError {
            field: "senha",
            message: format!("must be at least {} characters", MIN_PASSWORD_LEN),
        });
    }
}

impl RegistrationForm {
    /// Check every field; all problems are reported at once.
    pub fn validate(&self) -> Result<(), AuthError> {
        if !self.consent {
            return Err(AuthError::ConsentRequired);
        }

        let mut errors = Vec::new();
        if self.nome.trim().chars().count() < 2 {
            errors.push(FieldError {
                field: "nome",
                message: "must have at least 2 characters".to_string(),
            });
        }
        if !CEP_RE.is_match(&normalize_cep(&self.cep)) {
            errors.push(FieldError {
                field: "cep",
                message: "expected 8 digits (00000-000)".to_string(),
            });
        }
        check_credentials(&self.email, &self.senha, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Invalid(errors))
        }
    }

    fn payload(&self, kind: AccountKind) -> Value {
        let mut payload = json!({
            "nome": self.nome.trim(),
            "email": normalize_email(&self.email),
            "senha": self.senha,
            "cep": normalize_cep(&self.cep),
        });
        if kind == AccountKind::Vendor {
            payload["vendedor"] = json!(1);
        }
        payload
    }
}

/// Development account kept on the device
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalAccount {
    nome: String,
    email: String,
    senha_sha256: String,
    #[serde(default)]
    cep: String,
}

fn digest(senha: &str) -> String {
    format!("{:x}", Sha256::digest(senha.as_bytes()))
}

pub struct Auth<'a> {
    api: &'a dyn ApiClient,
    kv: &'a dyn KvStore,
    local_fallback: bool,
}

impl<'a> Auth<'a> {
    pub fn new(api: &'a dyn ApiClient, kv: &'a dyn KvStore, local_fallback: bool) -> Self {
        Self {
            api,
            kv,
            local_fallback,
        }
    }

    /// Create an account. Does not sign in; the caller logs in afterwards.
    pub fn register(&self, form: &RegistrationForm, kind: AccountKind) -> Result<(), AuthError> {
        form.validate()?;

        match self
            .api
            .request(Method::Post, Some(&form.payload(kind)), "api/users")
        {
            Ok(body) => {
                if body.get("success") == Some(&Value::Bool(false)) {
                    return Err(AuthError::Rejected(server_message(&body, "registration failed")));
                }
                info!(email = %normalize_email(&form.email), ?kind, "account registered");
                Ok(())
            }
            Err(ApiError::Status { code: 409, .. }) => Err(AuthError::AlreadyRegistered),
            Err(ApiError::Status { message, .. }) => Err(AuthError::Rejected(message)),
            Err(e) if e.is_network() && self.local_fallback => {
                warn!(error = %e, "API unreachable; saving local development account");
                let account = LocalAccount {
                    nome: form.nome.trim().to_string(),
                    email: normalize_email(&form.email),
                    senha_sha256: digest(&form.senha),
                    cep: normalize_cep(&form.cep),
                };
                self.kv
                    .set(CREDENTIALS_KEY, &serde_json::to_string(&account).map_err(StoreError::from)?)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Authenticate and store the signed-in user.
    pub fn login(&self, email: &str, senha: &str) -> Result<User, AuthError> {
        let mut errors = Vec::new();
        check_credentials(email, senha, &mut errors);
        if !errors.is_empty() {
            return Err(AuthError::Invalid(errors));
        }

        let email = normalize_email(email);
        let body = json!({ "email": email, "senha": senha });
        let (user, token) = match self.api.request(Method::Post, Some(&body), "api/users/login") {
            Ok(resp) => {
                if resp.get("success") == Some(&Value::Bool(false)) {
                    return Err(AuthError::Rejected(server_message(&resp, "login failed")));
                }
                user_from_response(&resp, &email)
            }
            Err(ApiError::Status { code: 401, .. }) => return Err(AuthError::WrongCredentials),
            Err(ApiError::Status { code: 404, .. }) => return Err(AuthError::AccountNotFound),
            Err(ApiError::Status { message, .. }) => return Err(AuthError::Rejected(message)),
            Err(e) if e.is_network() && self.local_fallback => {
                warn!(error = %e, "API unreachable; trying local development account");
                (self.login_local(&email, senha)?, LOCAL_TOKEN.to_string())
            }
            Err(e) => return Err(e.into()),
        };

        session::sign_in(self.kv, &user, &token)?;
        info!(email = %user.email, "signed in");
        Ok(user)
    }

    fn login_local(&self, email: &str, senha: &str) -> Result<User, AuthError> {
        let raw = self
            .kv
            .get(CREDENTIALS_KEY)?
            .ok_or(AuthError::NoLocalAccount)?;
        let account: LocalAccount =
            serde_json::from_str(&raw).map_err(|_| AuthError::NoLocalAccount)?;

        if account.email == email && account.senha_sha256 == digest(senha) {
            Ok(User::new(&account.nome, &account.email))
        } else {
            Err(AuthError::WrongCredentials)
        }
    }

    /// Tell the server (best effort) and forget the local session.
    pub fn logout(&self) -> Result<(), AuthError> {
        if let Err(e) = self.api.request(Method::Get, None, "api/users/exit") {
            debug!(error = %e, "logout notification failed");
        }
        session::sign_out(self.kv)?;
        Ok(())
    }

    /// Ask the server for its last active session and adopt it.
    pub fn resume(&self) -> Result<Option<User>, AuthError> {
        let resp = match self.api.request(Method::Get, None, "api/users/last") {
            Ok(resp) => resp,
            Err(e) => {
                debug!(error = %e, "no session to resume");
                return Ok(None);
            }
        };

        let envelope = Envelope::from_value(&resp);
        if !envelope.success {
            return Ok(None);
        }
        let Some(data) = envelope.data else {
            return Ok(None);
        };
        let Some(user) = extract_user(&data) else {
            return Ok(None);
        };

        let token = token_from(&resp).unwrap_or_default();
        session::sign_in(self.kv, &user, &token)?;
        info!(email = %user.email, "session resumed");
        Ok(Some(user))
    }
}

fn server_message(body: &Value, default: &str) -> String {
    body.get("message")
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

/// Find `{email, nome}` in `value.user` or `value` itself
fn extract_user(value: &Value) -> Option<User> {
    let candidate = value.get("user").unwrap_or(value);
    let email = candidate.get("email")?.as_str()?;
    if email.trim().is_empty() {
        return None;
    }
    let mut user = User::new(
        candidate.get("nome").and_then(Value::as_str).unwrap_or_default(),
        email,
    );
    user.role = candidate
        .get("role")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(user)
}

fn token_from(resp: &Value) -> Option<String> {
    resp.get("token")
        .or_else(|| resp.get("data").and_then(|d| d.get("token")))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// The login response shape varies; fall back to the submitted e-mail.
fn user_from_response(resp: &Value, email: &str) -> (User, String) {
    let user = resp
        .get("data")
        .and_then(extract_user)
        .or_else(|| extract_user(resp))
        .unwrap_or_else(|| User::new("", email));
    (user, token_from(resp).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::CannedClient;
    use crate::kv::MemoryStore;
    use crate::session::current_user;

    fn form() -> RegistrationForm {
        RegistrationForm {
            nome: "Ana Souza".to_string(),
            email: " Ana@Example.com ".to_string(),
            senha: "secret1".to_string(),
            cep: "01310100".to_string(),
            consent: true,
        }
    }

    #[test]
    fn test_normalize_cep() {
        assert_eq!(normalize_cep("01310100"), "01310-100");
        assert_eq!(normalize_cep("01310-100999"), "01310-100");
        assert_eq!(normalize_cep("0131"), "0131");
        assert_eq!(normalize_cep("abc"), "");
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn test_registration_validation_collects_errors() {
        assert!(form().validate().is_ok());

        let bad = RegistrationForm {
            nome: " A ".to_string(),
            email: "nope".to_string(),
            senha: "123".to_string(),
            cep: "123".to_string(),
            consent: true,
        };
        match bad.validate() {
            Err(AuthError::Invalid(errors)) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
                assert_eq!(fields, vec!["nome", "cep", "email", "senha"]);
            }
            other => panic!("unexpected: {:?}", other),
        }

        let no_consent = RegistrationForm {
            consent: false,
            ..form()
        };
        assert!(matches!(no_consent.validate(), Err(AuthError::ConsentRequired)));
    }

    #[test]
    fn test_register_vendor_payload() {
        let api = CannedClient::default().with("api/users", Ok(json!({"success": true})));
        let kv = MemoryStore::new();
        Auth::new(&api, &kv, false)
            .register(&form(), AccountKind::Vendor)
            .unwrap();

        let calls = api.calls.borrow();
        let (method, path, body) = &calls[0];
        assert_eq!(*method, Method::Post);
        assert_eq!(path, "api/users");
        let body = body.as_ref().unwrap();
        assert_eq!(body["email"], "ana@example.com");
        assert_eq!(body["cep"], "01310-100");
        assert_eq!(body["vendedor"], 1);
        // Registering does not sign in
        assert!(current_user(&kv).is_none());
    }

    #[test]
    fn test_register_rejected_by_server() {
        let api = CannedClient::default().with(
            "api/users",
            Ok(json!({"success": false, "message": "E-mail já cadastrado."})),
        );
        let kv = MemoryStore::new();
        let err = Auth::new(&api, &kv, false)
            .register(&form(), AccountKind::Customer)
            .unwrap_err();
        assert_eq!(err.to_string(), "E-mail já cadastrado.");
    }

    #[test]
    fn test_register_network_error_without_fallback() {
        let api = CannedClient::default();
        let kv = MemoryStore::new();
        let err = Auth::new(&api, &kv, false)
            .register(&form(), AccountKind::Customer)
            .unwrap_err();
        assert!(matches!(err, AuthError::Api(ApiError::Transport(_))));
        assert!(kv.get(CREDENTIALS_KEY).unwrap().is_none());
    }

    #[test]
    fn test_login_success_signs_in() {
        let api = CannedClient::default().with(
            "api/users/login",
            Ok(json!({"success": true, "data": {"user": {"nome": "Ana", "email": "ana@example.com"}, "token": "t1"}})),
        );
        let kv = MemoryStore::new();
        let user = Auth::new(&api, &kv, false)
            .login("ANA@example.com", "secret1")
            .unwrap();
        assert_eq!(user.nome, "Ana");
        assert_eq!(current_user(&kv).unwrap().email, "ana@example.com");
        assert_eq!(session::persisted_auth(&kv).unwrap().token, "t1");

        let calls = api.calls.borrow();
        assert_eq!(calls[0].2.as_ref().unwrap()["email"], "ana@example.com");
    }

    #[test]
    fn test_login_bare_response_uses_submitted_email() {
        let api = CannedClient::default().with("api/users/login", Ok(json!({"ok": 1})));
        let kv = MemoryStore::new();
        let user = Auth::new(&api, &kv, false)
            .login("ana@example.com", "secret1")
            .unwrap();
        assert_eq!(user.email, "ana@example.com");
        assert_eq!(user.nome, "");
    }

    #[test]
    fn test_login_wrong_password() {
        let api = CannedClient::default().with(
            "api/users/login",
            Err(ApiError::Status {
                code: 401,
                message: "unauthorized".to_string(),
                body: Value::Null,
            }),
        );
        let kv = MemoryStore::new();
        let err = Auth::new(&api, &kv, false)
            .login("ana@example.com", "secret1")
            .unwrap_err();
        assert!(matches!(err, AuthError::WrongCredentials));
        assert!(current_user(&kv).is_none());
    }

    #[test]
    fn test_login_validates_before_calling_api() {
        let api = CannedClient::default();
        let kv = MemoryStore::new();
        let err = Auth::new(&api, &kv, true).login("bad", "1").unwrap_err();
        assert!(matches!(err, AuthError::Invalid(ref e) if e.len() == 2));
        assert!(api.calls.borrow().is_empty());
    }

    #[test]
    fn test_local_fallback_register_then_login() {
        let api = CannedClient::default();
        let kv = MemoryStore::new();
        let auth = Auth::new(&api, &kv, true);

        auth.register(&form(), AccountKind::Customer).unwrap();
        let stored = kv.get(CREDENTIALS_KEY).unwrap().unwrap();
        assert!(!stored.contains("secret1"));

        assert!(matches!(
            auth.login("ana@example.com", "wrong-pass"),
            Err(AuthError::WrongCredentials)
        ));
        let user = auth.login("ana@example.com", "secret1").unwrap();
        assert_eq!(user.nome, "Ana Souza");
        assert_eq!(session::persisted_auth(&kv).unwrap().token, LOCAL_TOKEN);
    }

    #[test]
    fn test_local_fallback_without_account() {
        let api = CannedClient::default();
        let kv = MemoryStore::new();
        let err = Auth::new(&api, &kv, true)
            .login("ana@example.com", "secret1")
            .unwrap_err();
        assert!(matches!(err, AuthError::NoLocalAccount));
    }

    #[test]
    fn test_logout_ignores_api_failure() {
        let api = CannedClient::default();
        let kv = MemoryStore::new();
        session::sign_in(&kv, &User::new("Ana", "ana@example.com"), "t").unwrap();
        kv.set("products:ana@example.com", "[]").unwrap();

        Auth::new(&api, &kv, false).logout().unwrap();
        assert!(current_user(&kv).is_none());
        assert!(kv.get("products:ana@example.com").unwrap().is_some());
        assert_eq!(api.calls.borrow()[0].1, "api/users/exit");
    }

    #[test]
    fn test_resume() {
        let api = CannedClient::default().with(
            "api/users/last",
            Ok(json!({"success": true, "data": {"nome": "Bob", "email": "Bob@Example.com"}})),
        );
        let kv = MemoryStore::new();
        let user = Auth::new(&api, &kv, false).resume().unwrap().unwrap();
        assert_eq!(user.email, "bob@example.com");
        assert_eq!(current_user(&kv).unwrap().nome, "Bob");

        let api = CannedClient::default().with("api/users/last", Ok(json!({"success": false})));
        let kv = MemoryStore::new();
        assert!(Auth::new(&api, &kv, false).resume().unwrap().is_none());
        assert!(Auth::new(&CannedClient::default(), &kv, false)
            .resume()
            .unwrap()
            .is_none());
    }
}
