use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use rand::rngs::OsRng;
use tower_cookies::cookie::time::Duration;
use tower_cookies::{Cookie, Cookies};

/// The cookie carrying the client-local device token.
pub const DEVICE_COOKIE: &str = "device_id";

/// The size of the random part of a device token in bytes.
const DEVICE_TOKEN_SIZE: usize = 16;

/// How long a browser profile keeps its device token.
const DEVICE_COOKIE_MAX_AGE_DAYS: i64 = 365;

/// Generates a new random device token.
///
/// # Returns
///
/// A URL-safe token of the form `client_<base64>`.
pub fn generate_device_id() -> String {
    let mut token = [0u8; DEVICE_TOKEN_SIZE];
    OsRng.fill_bytes(&mut token);

    format!("client_{}", general_purpose::URL_SAFE_NO_PAD.encode(token))
}

fn device_cookie(value: String, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(DEVICE_COOKIE, value);
    cookie.set_http_only(true);
    cookie.set_secure(secure);
    cookie.set_same_site(tower_cookies::cookie::SameSite::Lax);
    cookie.set_max_age(Duration::days(DEVICE_COOKIE_MAX_AGE_DAYS));
    cookie.set_path("/");
    cookie
}

/// Picks the device token for a submission.
///
/// An explicit token from the client wins, then the `device_id` cookie. A
/// client presenting neither gets a fresh token, stored in the cookie so the
/// same browser presents it next time.
///
/// Device tokens are a deterrent only: clearing storage or switching browsers
/// yields a new one.
pub fn resolve_device_id(cookies: &Cookies, supplied: Option<&str>, secure: bool) -> String {
    if let Some(device_id) = supplied.map(str::trim).filter(|d| !d.is_empty()) {
        return device_id.to_string();
    }

    if let Some(cookie) = cookies.get(DEVICE_COOKIE) {
        let value = cookie.value().trim();
        if !value.is_empty() {
            return value.to_string();
        }
    }

    let device_id = generate_device_id();
    tracing::debug!("🔑 Issued new device token");
    cookies.add(device_cookie(device_id.clone(), secure));
    device_id
}
