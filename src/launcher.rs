//! Readiness probe and frontend URLs for whatever hosts the dashboard windows.
//!
//! A window host should not open the viewer or admin page until the server
//! answers, so `wait_for_server` polls the root until any HTTP response comes
//! back. Redirects count as an answer (dev mode redirects every page).

use std::time::{Duration, Instant};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);
const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Poll `url` until it responds or `timeout` elapses.
pub async fn wait_for_server(url: &str, timeout: Duration) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("cannot build http client: {}", e);
            return false;
        }
    };

    let deadline = Instant::now() + timeout;
    loop {
        match client.get(url).send().await {
            Ok(response) => {
                tracing::debug!(status = %response.status(), "server answered at {}", url);
                return true;
            }
            Err(e) => tracing::trace!("server not ready at {}: {}", url, e),
        }
        if Instant::now() + RETRY_INTERVAL >= deadline {
            return false;
        }
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
}

/// pages a window host opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendUrls {
    pub viewer: String,
    pub admin: String,
}

impl FrontendUrls {
    /// Dev mode points at the frontend dev server instead of the hub.
    /// A wildcard bind address is reached through loopback.
    pub fn new(host: &str, port: u16, dev_mode: bool, dev_port: u16) -> Self {
        let host = match host {
            "0.0.0.0" | "::" | "" => "localhost",
            other => other,
        };
        let port = if dev_mode { dev_port } else { port };
        let base = format!("http://{}:{}", host, port);
        Self { viewer: format!("{}/", base), admin: format!("{}/admin", base) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frontend_urls() {
        let urls = FrontendUrls::new("0.0.0.0", 8080, false, 5173);
        assert_eq!(urls.viewer, "http://localhost:8080/");
        assert_eq!(urls.admin, "http://localhost:8080/admin");

        let dev = FrontendUrls::new("192.168.1.20", 8080, true, 5173);
        assert_eq!(dev.admin, "http://192.168.1.20:5173/admin");
    }

    #[tokio::test]
    async fn test_wait_for_server_gives_up() {
        // bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let started = Instant::now();
        let ready = wait_for_server(&format!("http://{}/", addr), Duration::from_millis(1200)).await;
        assert!(!ready);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
