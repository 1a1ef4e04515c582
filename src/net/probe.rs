//! Reachability probes
//!
//! The platform's own connectivity signal is unreliable (captive portals
//! report online while nothing gets through), so the monitor issues its
//! own lightweight request on a timer. The probe is a trait so tests can
//! script reachability.

use async_trait::async_trait;
use std::time::Duration;

/// Active reachability check against the backing service
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// True when the service answered within the probe's deadline.
    ///
    /// Failures are expected and carry no detail; the monitor only needs
    /// the boolean.
    async fn check(&self) -> bool;
}

/// HTTP probe hitting a lightweight endpoint (typically `/health`)
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    /// Build a probe with the given per-request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Probe client built without its timeout: {}", e);
                reqwest::Client::default()
            });
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Scriptable probe for tests
#[cfg(test)]
pub(crate) struct StaticProbe(pub std::sync::atomic::AtomicBool);

#[cfg(test)]
#[async_trait]
impl ReachabilityProbe for StaticProbe {
    async fn check(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}
