pub mod auth;
pub mod clock;
pub mod password;
pub mod pkce;
pub mod secret;
