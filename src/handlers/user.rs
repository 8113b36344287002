use axum::Json;

use crate::dto::UserInfoResponse;
use crate::middleware::AuthContext;

/// GET /users/me - profile of the token's resource owner.
///
/// Client-credentials tokens carry no user; every field is null then, and
/// `login` stays in the body so callers can tell the difference.
pub async fn me_handler(ctx: AuthContext) -> Json<UserInfoResponse> {
    let response = match ctx.user {
        Some(user) => UserInfoResponse {
            login: Some(user.login),
            email: Some(user.email),
            roles: Some(user.roles),
            permissions: Some(user.permissions),
        },
        None => UserInfoResponse {
            login: None,
            email: None,
            roles: None,
            permissions: None,
        },
    };

    Json(response)
}
