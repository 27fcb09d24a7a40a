//! Backend availability: make sure a self-hosted backend is reachable
//! before a turn starts, launching it if needed.
//!
//! Probe → launch → poll until reachable or the deadline passes. Only one
//! launch is in flight per manager; concurrent callers just poll.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tauti_config::AvailabilityConfig;
use tauti_core::error::ProviderError;
use tauti_core::provider::Provider;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ollama::OllamaProvider;

/// Starts a backend process. Implementations return once the launch has
/// been issued; readiness is established by polling.
#[async_trait]
pub trait BackendLauncher: Send + Sync {
    async fn launch(&self) -> Result<(), ProviderError>;
}

/// Launches `ollama serve` as a detached background process.
pub struct OllamaLauncher {
    executable: String,
}

impl OllamaLauncher {
    pub fn new(ollama_path: Option<&str>) -> Self {
        let executable = ollama_path
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or("ollama")
            .to_string();
        Self { executable }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }
}

#[async_trait]
impl BackendLauncher for OllamaLauncher {
    #[cfg(not(target_os = "windows"))]
    async fn launch(&self) -> Result<(), ProviderError> {
        use std::process::Stdio;

        tokio::process::Command::new(&self.executable)
            .arg("serve")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(drop)
            .map_err(|e| ProviderError::Unavailable {
                endpoint: self.executable.clone(),
                reason: format!("failed to launch: {e}"),
            })
    }

    #[cfg(target_os = "windows")]
    async fn launch(&self) -> Result<(), ProviderError> {
        use tokio::process::Command;

        let script = format!(
            "Start-Process -WindowStyle Hidden -FilePath '{}' -ArgumentList 'serve'",
            self.executable.replace('\'', "''")
        );
        let powershell = Command::new("powershell")
            .args(["-NoProfile", "-WindowStyle", "Hidden", "-Command", &script])
            .status()
            .await;
        if matches!(powershell, Ok(status) if status.success()) {
            return Ok(());
        }

        debug!("powershell launch failed, falling back to cmd start");
        Command::new("cmd")
            .args(["/C", "start", "", &self.executable, "serve"])
            .spawn()
            .map(drop)
            .map_err(|e| ProviderError::Unavailable {
                endpoint: self.executable.clone(),
                reason: format!("failed to launch: {e}"),
            })
    }
}

/// Probes a backend and launches it when unreachable.
pub struct AvailabilityManager {
    endpoint: String,
    probe: Arc<dyn Provider>,
    launcher: Arc<dyn BackendLauncher>,
    probe_timeout: Duration,
    poll_interval: Duration,
    deadline: Duration,
    launching: AtomicBool,
}

/// Clears the in-flight flag when the launching caller stops polling,
/// including when its future is dropped.
struct LaunchGuard<'a>(&'a AtomicBool);

impl Drop for LaunchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AvailabilityManager {
    pub fn new(
        endpoint: impl Into<String>,
        probe: Arc<dyn Provider>,
        launcher: Arc<dyn BackendLauncher>,
        settings: &AvailabilityConfig,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            probe,
            launcher,
            probe_timeout: Duration::from_millis(settings.probe_timeout_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            deadline: Duration::from_secs(settings.deadline_secs),
            launching: AtomicBool::new(false),
        }
    }

    /// Manager for an Ollama daemon at `base_url`.
    pub fn for_ollama(
        base_url: &str,
        ollama_path: Option<&str>,
        settings: &AvailabilityConfig,
    ) -> Self {
        Self::new(
            base_url,
            Arc::new(OllamaProvider::new(base_url)),
            Arc::new(OllamaLauncher::new(ollama_path)),
            settings,
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Ensure the backend answers, launching it if necessary.
    pub async fn ensure_available(&self) -> Result<(), ProviderError> {
        self.ensure_available_until(&CancellationToken::new()).await
    }

    /// As [`Self::ensure_available`], giving up as soon as `cancel` fires.
    pub async fn ensure_available_until(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        if self.probe_once().await {
            debug!(endpoint = %self.endpoint, "Backend reachable");
            return Ok(());
        }

        let _guard = if self
            .launching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!(endpoint = %self.endpoint, "Backend unreachable, launching");
            if let Err(e) = self.launcher.launch().await {
                warn!(endpoint = %self.endpoint, error = %e, "Backend launch failed");
            }
            Some(LaunchGuard(&self.launching))
        } else {
            debug!(endpoint = %self.endpoint, "Launch already in flight, polling only");
            None
        };

        let deadline = Instant::now() + self.deadline;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ProviderError::Unavailable {
                        endpoint: self.endpoint.clone(),
                        reason: "cancelled while waiting for backend".into(),
                    });
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if self.probe_once().await {
                info!(endpoint = %self.endpoint, "Backend became reachable");
                return Ok(());
            }

            if Instant::now() >= deadline {
                warn!(
                    endpoint = %self.endpoint,
                    deadline_secs = self.deadline.as_secs(),
                    "Backend did not become reachable"
                );
                return Err(ProviderError::Unavailable {
                    endpoint: self.endpoint.clone(),
                    reason: format!(
                        "not reachable within {}s of launch",
                        self.deadline.as_secs()
                    ),
                });
            }
        }
    }

    async fn probe_once(&self) -> bool {
        match tokio::time::timeout(self.probe_timeout, self.probe.health_check()).await {
            Ok(Ok(healthy)) => healthy,
            Ok(Err(e)) => {
                debug!(endpoint = %self.endpoint, error = %e, "Probe failed");
                false
            }
            Err(_) => {
                debug!(endpoint = %self.endpoint, "Probe timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tauti_core::provider::{ProviderRequest, ProviderResponse};

    /// Reachable once `launched` is set and `polls_after_launch` probes
    /// have failed since.
    struct ScriptedBackend {
        launched: AtomicBool,
        polls_after_launch: usize,
        probes_since_launch: AtomicUsize,
        never_up: bool,
    }

    impl ScriptedBackend {
        fn new(polls_after_launch: usize) -> Arc<Self> {
            Arc::new(Self {
                launched: AtomicBool::new(false),
                polls_after_launch,
                probes_since_launch: AtomicUsize::new(0),
                never_up: false,
            })
        }

        fn dead() -> Arc<Self> {
            Arc::new(Self {
                launched: AtomicBool::new(false),
                polls_after_launch: 0,
                probes_since_launch: AtomicUsize::new(0),
                never_up: true,
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::Network("not used".into()))
        }

        async fn health_check(&self) -> Result<bool, ProviderError> {
            if self.never_up || !self.launched.load(Ordering::SeqCst) {
                return Err(ProviderError::Network("connection refused".into()));
            }
            let n = self.probes_since_launch.fetch_add(1, Ordering::SeqCst);
            Ok(n >= self.polls_after_launch)
        }
    }

    struct CountingLauncher {
        backend: Arc<ScriptedBackend>,
        launches: AtomicUsize,
    }

    #[async_trait]
    impl BackendLauncher for CountingLauncher {
        async fn launch(&self) -> Result<(), ProviderError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            self.backend.launched.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(backend: Arc<ScriptedBackend>) -> (AvailabilityManager, Arc<CountingLauncher>) {
        let launcher = Arc::new(CountingLauncher {
            backend: backend.clone(),
            launches: AtomicUsize::new(0),
        });
        let mgr = AvailabilityManager::new(
            "http://localhost:11434",
            backend,
            launcher.clone(),
            &AvailabilityConfig::default(),
        );
        (mgr, launcher)
    }

    #[tokio::test(start_paused = true)]
    async fn reachable_backend_is_not_launched() {
        let backend = ScriptedBackend::new(0);
        backend.launched.store(true, Ordering::SeqCst);
        let (mgr, launcher) = manager(backend);

        mgr.ensure_available().await.unwrap();
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_backend_is_launched_then_polled() {
        let (mgr, launcher) = manager(ScriptedBackend::new(2));

        let start = Instant::now();
        mgr.ensure_available().await.unwrap();
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        // two failed polls, success on the third
        assert_eq!(start.elapsed(), Duration::from_millis(900 * 3));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_yields_unavailable() {
        let (mgr, launcher) = manager(ScriptedBackend::dead());

        let start = Instant::now();
        let err = mgr.ensure_available().await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable { .. }));
        assert!(start.elapsed() >= Duration::from_secs(12));
        assert!(start.elapsed() < Duration::from_secs(13));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        assert!(!mgr.launching.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_launch() {
        let (mgr, launcher) = manager(ScriptedBackend::new(3));

        let (a, b) = tokio::join!(mgr.ensure_available(), mgr.ensure_available());
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let (mgr, _launcher) = manager(ScriptedBackend::dead());
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let err = mgr.ensure_available_until(&token).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn launcher_defaults_to_ollama_on_path() {
        assert_eq!(OllamaLauncher::new(None).executable(), "ollama");
        assert_eq!(OllamaLauncher::new(Some("  ")).executable(), "ollama");
        assert_eq!(
            OllamaLauncher::new(Some("/opt/ollama/bin/ollama")).executable(),
            "/opt/ollama/bin/ollama"
        );
    }
}
