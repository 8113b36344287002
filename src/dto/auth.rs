use serde::{Deserialize, Serialize};

/// Form body of `POST /login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginForm {
    pub login: Option<String>,
    pub password: Option<String>,
    pub csrf_token: Option<String>,
}

/// JSON answer for XHR logins; browsers get a 302 instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "landing-url")]
    pub landing_url: String,
}

/// Form body of `POST /approve`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApproveForm {
    pub csrf_token: Option<String>,
}
