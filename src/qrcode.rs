use crate::config::Config;

/// Renders the scan token for the human holding the phone. Rendering a
/// scannable code (terminal QR, image file, ...) is the implementer's
/// business; the client only hands over the URL the token lives at.
pub trait TokenDisplay: Send + Sync {
    fn show(&self, url: &str);
}

/// Builds the URL the scan token is reachable at.
pub fn login_url(config: &Config, token: &str) -> String {
    format!("{}/l/{}", config.auth_url, token)
}

/// Fallback display that prints the raw URL.
#[derive(Debug, Default)]
pub struct StdoutTokenDisplay;

impl TokenDisplay for StdoutTokenDisplay {
    fn show(&self, url: &str) {
        println!("Scan to log in: {url}");
    }
}
