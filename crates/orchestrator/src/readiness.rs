//! Polling a detached phase until it serves.

use launcher_core::ReadinessProbe;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Why waiting for readiness stopped without success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotReady {
    TimedOut(Duration),
    Cancelled,
}

pub struct ReadinessChecker {
    client: reqwest::Client,
    interval: Duration,
    timeout: Duration,
}

impl ReadinessChecker {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(interval.max(Duration::from_secs(2)))
            .build()
            .unwrap_or_default();
        Self {
            client,
            interval,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Try the probe once.
    pub async fn probe_once(&self, probe: &ReadinessProbe) -> bool {
        match probe {
            ReadinessProbe::Http { url } => match self.client.get(url).send().await {
                Ok(response) => response.status().as_u16() < 500,
                Err(e) => {
                    debug!(url = %url, error = %e, "Readiness probe not answering");
                    false
                }
            },
            ReadinessProbe::Tcp { address } => TcpStream::connect(address.as_str()).await.is_ok(),
        }
    }

    /// Poll until the probe passes, the timeout elapses or `cancel` fires.
    pub async fn wait_until_ready(
        &self,
        probe: &ReadinessProbe,
        cancel: &CancellationToken,
    ) -> Result<(), NotReady> {
        let poll = async {
            loop {
                if self.probe_once(probe).await {
                    return;
                }
                tokio::time::sleep(self.interval).await;
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NotReady::Cancelled),
            result = tokio::time::timeout(self.timeout, poll) => match result {
                Ok(()) => {
                    info!(probe = %probe.describe(), "Readiness probe passed");
                    Ok(())
                }
                Err(_) => Err(NotReady::TimedOut(self.timeout)),
            },
        }
    }
}
