use axum_extra::extract::cookie::{Cookie, SameSite};

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "token";

/// Session cookie for `token`. Cross-site deployments need `SameSite=None`,
/// which browsers only accept together with `Secure`.
pub fn session_cookie(token: String, production: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .secure(production)
        .same_site(same_site(production))
        .path("/")
        .build()
}

/// Cookie used to expire the session; attributes must match the original.
pub fn removal_cookie(production: bool) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE)
        .http_only(true)
        .secure(production)
        .same_site(same_site(production))
        .path("/")
        .build()
}

fn same_site(production: bool) -> SameSite {
    if production {
        SameSite::None
    } else {
        SameSite::Lax
    }
}
