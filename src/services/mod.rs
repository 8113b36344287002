pub mod auth;
pub mod oauth;
pub mod session;

pub use auth::AuthService;
pub use oauth::{AuthorizeOutcome, OAuthService, ValidatedAuthorize};
pub use session::{SessionService, SESSION_COOKIE};
