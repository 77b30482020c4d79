//! Side monitors
//!
//! Two free-standing timers owned by the process entry point: a liveness ping
//! and a public-IP change notifier. Neither shares state with the worker
//! loop; each is a cooperative task stopped through a cancellation token.

use crate::error::{Result, WorkerError};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MONITOR_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Public IP echo service used by the watcher.
const IP_ECHO_URL: &str = "https://api.ipify.org";

/// Running monitor task; dropped monitors keep running until stopped.
pub struct MonitorHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl MonitorHandle {
    /// Cancel the monitor and wait for it to exit.
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}

fn monitor_client() -> Result<Client> {
    Client::builder()
        .timeout(MONITOR_HTTP_TIMEOUT)
        .build()
        .map_err(|e| WorkerError::Transport {
            endpoint: "monitor_client_init".to_string(),
            source: e,
        })
}

/// Periodically pings a healthchecks.io-style URL so the hosted check can
/// alert when the worker goes silent.
pub struct LivenessPinger {
    client: Client,
    ping_url: String,
    interval: Duration,
}

impl LivenessPinger {
    pub fn new(ping_url: &str, interval: Duration) -> Result<Self> {
        Ok(Self {
            client: monitor_client()?,
            ping_url: ping_url.to_string(),
            interval,
        })
    }

    pub fn spawn(self) -> MonitorHandle {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        info!("Liveness pinger started (every {:?})", self.interval);

        let handle = tokio::spawn(async move {
            loop {
                match self.client.get(&self.ping_url).send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!("Liveness ping ok");
                    }
                    Ok(response) => {
                        warn!("Liveness ping returned HTTP {}", response.status());
                    }
                    Err(e) => {
                        warn!("Liveness ping failed: {}", e);
                    }
                }

                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = sleep(self.interval) => {}
                }
            }
            debug!("Liveness pinger stopped");
        });

        MonitorHandle { token, handle }
    }
}

/// Watches the worker's public IP and posts a webhook notification when it
/// changes, so external allowlists can be re-registered.
pub struct IpWatcher {
    client: Client,
    webhook_url: String,
    check_interval: Duration,
}

impl IpWatcher {
    pub fn new(webhook_url: &str, check_interval: Duration) -> Result<Self> {
        Ok(Self {
            client: monitor_client()?,
            webhook_url: webhook_url.to_string(),
            check_interval,
        })
    }

    pub fn spawn(self) -> MonitorHandle {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        info!("IP watcher started (every {:?})", self.check_interval);

        let handle = tokio::spawn(async move {
            let mut last_known_ip: Option<String> = None;

            loop {
                match self.current_ip().await {
                    Ok(ip) => match &last_known_ip {
                        None => {
                            info!("Public IP: {}", ip);
                            last_known_ip = Some(ip);
                        }
                        Some(previous) if *previous != ip => {
                            warn!("Public IP changed: {} -> {}", previous, ip);
                            if let Err(e) = self.notify(previous, &ip).await {
                                warn!("IP change notification failed: {}", e);
                            }
                            last_known_ip = Some(ip);
                        }
                        Some(_) => debug!("Public IP unchanged"),
                    },
                    Err(e) => warn!("Public IP lookup failed: {}", e),
                }

                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = sleep(self.check_interval) => {}
                }
            }
            debug!("IP watcher stopped");
        });

        MonitorHandle { token, handle }
    }

    async fn current_ip(&self) -> Result<String> {
        let response = self
            .client
            .get(IP_ECHO_URL)
            .send()
            .await
            .map_err(|e| WorkerError::Transport {
                endpoint: "ip_echo".to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::HttpStatus {
                endpoint: "ip_echo".to_string(),
                status: status.as_u16(),
            });
        }

        let ip = response.text().await.map_err(|e| WorkerError::Transport {
            endpoint: "ip_echo".to_string(),
            source: e,
        })?;
        Ok(ip.trim().to_string())
    }

    async fn notify(&self, old_ip: &str, new_ip: &str) -> Result<()> {
        let payload = json!({
            "text": format!(
                "Worker public IP changed: {old_ip} -> {new_ip}. \
                 Re-register the API allowlist."
            ),
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WorkerError::Transport {
                endpoint: "ip_webhook".to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::HttpStatus {
                endpoint: "ip_webhook".to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
