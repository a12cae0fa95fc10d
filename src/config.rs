//! Environment-backed configuration. Values are read once and cached for the
//! life of the process.

use std::env;
use std::sync::OnceLock;

const DEFAULT_APP_HOST: &str = "localhost";
const DEFAULT_APIC_HOSTNAME: &str = "172.17.0.1";
const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8000";

static RESOLVED_APP_HOST: OnceLock<String> = OnceLock::new();
static RESOLVED_APIC_URL: OnceLock<String> = OnceLock::new();

/// Host name this application is served from. Deployment-mode detection keys
/// off this value: a `localhost` host means a standalone development run.
pub fn get_app_host() -> String {
    RESOLVED_APP_HOST
        .get_or_init(|| env::var("APP_HOST").unwrap_or_else(|_| DEFAULT_APP_HOST.to_string()))
        .clone()
}

/// Controller base URL for standalone mode, normalized to URL form.
pub fn get_apic_url() -> String {
    RESOLVED_APIC_URL
        .get_or_init(|| {
            let hostname =
                env::var("APIC_HOSTNAME").unwrap_or_else(|_| DEFAULT_APIC_HOSTNAME.to_string());
            normalize_controller_url(&hostname)
        })
        .clone()
}

/// Ensure a controller address is in URL form. Bare hosts are assumed https.
pub fn normalize_controller_url(hostname: &str) -> String {
    if hostname.to_lowercase().starts_with("http") {
        hostname.to_string()
    } else {
        format!("https://{}", hostname)
    }
}

/// Listen address for the resolve backend.
pub fn get_bind_address() -> String {
    env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string())
}

/// Login credentials. No defaults: credential acquisition is an injected
/// concern, and a missing pair is surfaced as an error at login time.
pub fn get_login_credentials() -> Option<(String, String)> {
    let username = env::var("APIC_USERNAME").ok()?;
    let password = env::var("APIC_PASSWORD").ok()?;
    if username.is_empty() || password.is_empty() {
        return None;
    }
    Some((username, password))
}

/// Whether to verify the controller's TLS certificate. Controllers commonly
/// run with self-signed certificates, so this defaults off.
pub fn verify_ssl() -> bool {
    env::var("APIC_VERIFY_SSL")
        .ok()
        .and_then(|val| val.parse::<u8>().ok())
        .map(|val| val != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_controller_url_bare_host() {
        assert_eq!(
            normalize_controller_url("apic1.example.com"),
            "https://apic1.example.com"
        );
        assert_eq!(normalize_controller_url("172.17.0.1"), "https://172.17.0.1");
    }

    #[test]
    fn test_normalize_controller_url_keeps_scheme() {
        assert_eq!(
            normalize_controller_url("http://apic1.example.com"),
            "http://apic1.example.com"
        );
        assert_eq!(
            normalize_controller_url("HTTPS://apic1.example.com"),
            "HTTPS://apic1.example.com"
        );
    }
}
