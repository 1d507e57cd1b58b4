use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{CONTENT_TYPE, RANGE};
use reqwest::{Response, Url};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::channels::{Channel, ChannelStatus};
use crate::error::ProbeError;
use crate::metrics::{PROBES_TOTAL, PROBE_LATENCY};

#[derive(Debug, Deserialize, Clone)]
pub struct CheckerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub strict_content_type: bool,
}

fn default_concurrency() -> usize {
    10
}

fn default_probe_timeout_secs() -> u64 {
    5
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_probe_timeout_secs(),
            strict_content_type: false,
        }
    }
}

/// One finished probe; `index` points into the selection handed to
/// [`Checker::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub index: usize,
    pub outcome: Result<Duration, ProbeError>,
}

impl CheckResult {
    pub fn status(&self) -> ChannelStatus {
        match self.outcome {
            Ok(_) => ChannelStatus::Working,
            Err(_) => ChannelStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckSummary {
    pub total: usize,
    pub working: usize,
    pub failed: usize,
    /// Never probed because the check was cancelled.
    pub skipped: usize,
    pub cancelled: bool,
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "rtsp" => Some(554),
        "rtsps" => Some(322),
        "rtmp" => Some(1935),
        "rtmps" => Some(443),
        _ => None,
    }
}

#[derive(Clone)]
pub struct Checker {
    client: reqwest::Client,
    timeout: Duration,
    strict_content_type: bool,
}

impl Checker {
    pub fn new(config: &CheckerConfig) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        Self::with_timeout(timeout, config.strict_content_type)
    }

    pub fn with_timeout(timeout: Duration, strict_content_type: bool) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            timeout,
            strict_content_type,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Confirms the stream answers within the timeout. Nothing is decoded.
    pub async fn probe(&self, url: &str) -> Result<Duration, ProbeError> {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, self.reach(url)).await {
            Ok(Ok(())) => Ok(started.elapsed()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        }
    }

    async fn reach(&self, url: &str) -> Result<(), ProbeError> {
        let parsed = Url::parse(url).map_err(|e| ProbeError::Unreachable(format!("invalid URL: {}", e)))?;
        match parsed.scheme() {
            "http" | "https" => self.reach_http(url).await,
            scheme if default_port(scheme).is_some() => reach_tcp(&parsed).await,
            scheme => Err(ProbeError::Unreachable(format!("unsupported scheme {}", scheme))),
        }
    }

    async fn reach_http(&self, url: &str) -> Result<(), ProbeError> {
        // Many stream servers reject HEAD, so fall back to a small ranged GET.
        match self.client.head(url).send().await {
            Ok(resp) if resp.status().is_success() => return self.accept(&resp),
            Ok(resp) => debug!("HEAD {} answered {}, retrying with GET", url, resp.status()),
            Err(e) if e.is_connect() => return Err(ProbeError::Unreachable(e.to_string())),
            Err(e) => debug!("HEAD {} failed: {}, retrying with GET", url, e),
        }

        match self.client.get(url).header(RANGE, "bytes=0-1023").send().await {
            Ok(resp) if resp.status().is_success() => self.accept(&resp),
            Ok(resp) => Err(ProbeError::Unreachable(format!("HTTP {}", resp.status()))),
            Err(e) => Err(ProbeError::Unreachable(e.to_string())),
        }
    }

    fn accept(&self, resp: &Response) -> Result<(), ProbeError> {
        if !self.strict_content_type {
            return Ok(());
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if ["video/", "audio/", "application/"]
            .iter()
            .any(|prefix| content_type.starts_with(prefix))
        {
            Ok(())
        } else {
            Err(ProbeError::Unreachable(format!("unexpected content type {:?}", content_type)))
        }
    }

    /// Probes every channel in `selection` with up to `concurrency` probes
    /// in flight and writes the outcome back as the channel status.
    ///
    /// `on_progress(completed, total)` runs on the collecting task after
    /// each probe, with `completed` strictly increasing. Cancelling `cancel`
    /// stops dispatch; probes already running finish, and channels that
    /// were never dispatched stay `Unchecked`.
    pub async fn check<F>(
        &self,
        mut selection: Vec<&mut Channel>,
        concurrency: usize,
        mut on_progress: F,
        cancel: &CancellationToken,
    ) -> CheckSummary
    where
        F: FnMut(usize, usize),
    {
        let total = selection.len();
        let mut summary = CheckSummary {
            total,
            ..Default::default()
        };
        if total == 0 {
            return summary;
        }

        for channel in selection.iter_mut() {
            channel.status = ChannelStatus::Unchecked;
        }

        let urls: Arc<Vec<String>> = Arc::new(selection.iter().map(|c| c.url.clone()).collect());
        let next = Arc::new(AtomicUsize::new(0));
        let workers = concurrency.clamp(1, total);
        let (tx, mut rx) = mpsc::channel::<CheckResult>(workers);

        info!("Checking {} channels with {} workers", total, workers);
        for worker in 0..workers {
            let checker = self.clone();
            let urls = urls.clone();
            let next = next.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::AcqRel);
                    let Some(url) = urls.get(index) else {
                        break;
                    };
                    let outcome = checker.probe(url).await;
                    if tx.send(CheckResult { index, outcome }).await.is_err() {
                        break;
                    }
                }
                debug!("Checker worker {} finished", worker);
            });
        }
        drop(tx);

        let mut completed = 0usize;
        while let Some(result) = rx.recv().await {
            let channel = &mut selection[result.index];
            channel.status = result.status();
            match &result.outcome {
                Ok(latency) => {
                    summary.working += 1;
                    PROBES_TOTAL.with_label_values(&["working"]).inc();
                    PROBE_LATENCY.observe(latency.as_secs_f64());
                    debug!("Channel {} working ({} ms)", channel.name, latency.as_millis());
                }
                Err(e) => {
                    summary.failed += 1;
                    let outcome = match e {
                        ProbeError::Timeout(_) => "timeout",
                        ProbeError::Unreachable(_) => "unreachable",
                    };
                    PROBES_TOTAL.with_label_values(&[outcome]).inc();
                    debug!("Channel {} failed: {}", channel.name, e);
                }
            }
            completed += 1;
            on_progress(completed, total);
        }

        summary.skipped = total - completed;
        summary.cancelled = cancel.is_cancelled();
        info!(
            "Check finished: {} working, {} failed, {} skipped{}",
            summary.working,
            summary.failed,
            summary.skipped,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        summary
    }
}

async fn reach_tcp(url: &Url) -> Result<(), ProbeError> {
    let host = url
        .host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
        .ok_or_else(|| ProbeError::Unreachable("missing host".to_string()))?;
    let port = url
        .port()
        .or_else(|| default_port(url.scheme()))
        .ok_or_else(|| ProbeError::Unreachable("missing port".to_string()))?;
    TcpStream::connect((host, port))
        .await
        .map(|_| ())
        .map_err(|e| ProbeError::Unreachable(e.to_string()))
}
