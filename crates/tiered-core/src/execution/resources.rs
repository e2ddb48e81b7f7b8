//! Process resource sampling with soft limits.
//!
//! Memory is read from `VmRSS` in `/proc/self/status`; CPU is the delta of
//! `utime + stime` from `/proc/self/stat` between two samples. On platforms
//! without procfs both readings are `None`. Limits only ever produce
//! warnings; execution continues.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::tunables::ResourceLimits;
use crate::metrics::PipelineMetrics;
use crate::obs::ObservabilitySink;

/// Tick rate of the `utime`/`stime` fields in `/proc/<pid>/stat`.
///
/// procfs reports these in `USER_HZ`, not the kernel's internal `CONFIG_HZ`.
/// `USER_HZ` is part of the Linux userspace ABI and is 100 on every
/// architecture Rust targets. Elsewhere the rate is unknown and CPU usage is
/// not reported.
fn clock_ticks_per_sec() -> Option<f64> {
    cfg!(any(target_os = "linux", target_os = "android")).then_some(100.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsageSnapshot {
    pub memory_bytes: Option<u64>,
    pub cpu_percent: Option<f64>,
}

/// Parse `VmRSS:   12345 kB` out of `/proc/self/status` into bytes.
pub fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

/// Parse `utime + stime` (in clock ticks) out of `/proc/self/stat`.
///
/// Fields are counted after the closing paren of the command name, which may
/// itself contain spaces.
pub fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    // After ')' the first field is `state` (field 3); utime is field 14.
    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(utime + stime)
}

/// Samples this process. Keeps the previous CPU reading to compute a rate.
#[derive(Debug)]
pub struct ResourceSampler {
    ticks_per_sec: Option<f64>,
    last_cpu: Mutex<Option<(Instant, u64)>>,
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::with_tick_rate(clock_ticks_per_sec())
    }
}

impl ResourceSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sampler converting CPU ticks at `ticks_per_sec`. `None` disables
    /// CPU readings.
    pub fn with_tick_rate(ticks_per_sec: Option<f64>) -> Self {
        Self {
            ticks_per_sec: ticks_per_sec.filter(|hz| hz.is_finite() && *hz > 0.0),
            last_cpu: Mutex::new(None),
        }
    }

    pub fn sample(&self) -> ResourceUsageSnapshot {
        let memory_bytes = std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|s| parse_vm_rss(&s));
        let ticks = std::fs::read_to_string("/proc/self/stat")
            .ok()
            .and_then(|s| parse_cpu_ticks(&s));
        let cpu_percent = ticks.and_then(|ticks| self.cpu_rate(Instant::now(), ticks));
        ResourceUsageSnapshot {
            memory_bytes,
            cpu_percent,
        }
    }

    fn cpu_rate(&self, now: Instant, ticks: u64) -> Option<f64> {
        let hz = self.ticks_per_sec?;
        let mut last = self.last_cpu.lock().ok()?;
        let previous = last.replace((now, ticks));
        let (then, old_ticks) = previous?;
        let wall = now.duration_since(then).as_secs_f64();
        if wall <= 0.0 {
            return None;
        }
        let cpu = ticks.saturating_sub(old_ticks) as f64 / hz;
        Some(cpu / wall * 100.0)
    }
}

/// Human-readable warnings for every soft limit `snapshot` exceeds.
pub fn check_limits(snapshot: &ResourceUsageSnapshot, limits: &ResourceLimits) -> Vec<String> {
    let mut warnings = Vec::new();
    if let (Some(used), Some(max)) = (snapshot.memory_bytes, limits.max_memory_bytes) {
        if used > max {
            warnings.push(format!("memory {used} bytes exceeds soft limit {max} bytes"));
        }
    }
    if let (Some(used), Some(max)) = (snapshot.cpu_percent, limits.max_cpu_percent) {
        if used > max {
            warnings.push(format!("cpu {used:.1}% exceeds soft limit {max:.1}%"));
        }
    }
    warnings
}

/// Background sampler running for the duration of task execution.
pub struct ResourceMonitor {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Vec<String>>,
}

impl ResourceMonitor {
    /// Start sampling every `limits.sample_interval_ms`. Breaches are logged,
    /// counted and forwarded to `sink`.
    pub fn spawn(
        run_id: String,
        limits: ResourceLimits,
        metrics: Arc<PipelineMetrics>,
        sink: Arc<dyn ObservabilitySink>,
    ) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let sampler = ResourceSampler::new();
            let mut interval =
                tokio::time::interval(Duration::from_millis(limits.sample_interval_ms.max(1)));
            let mut warnings = Vec::new();
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = interval.tick() => {
                        let snapshot = sampler.sample();
                        for message in check_limits(&snapshot, &limits) {
                            warn!(event = "resource.soft_limit", run_id = %run_id, %message);
                            metrics.inc_resource_warnings();
                            sink.resource_warning(&run_id, &snapshot, &message);
                            warnings.push(message);
                        }
                    }
                }
            }
            warnings
        });
        Self { stop, handle }
    }

    /// Stop sampling and collect the warnings raised.
    pub async fn finish(self) -> Vec<String> {
        let _ = self.stop.send(());
        self.handle.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obs::TracingSink;

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\ttiered\nVmPeak:\t  2000 kB\nVmRSS:\t    1536 kB\nThreads:\t4\n";
        assert_eq!(parse_vm_rss(status), Some(1536 * 1024));
        assert_eq!(parse_vm_rss("Name:\tx\n"), None);
    }

    #[test]
    fn test_parse_cpu_ticks_handles_spaces_in_command() {
        let stat = "4242 (my worker) S 1 4242 4242 0 -1 4194560 500 0 0 0 250 50 0 0 20 0 4 0";
        assert_eq!(parse_cpu_ticks(stat), Some(300));
        assert_eq!(parse_cpu_ticks("garbage"), None);
    }

    #[test]
    fn test_cpu_rate_needs_two_samples() {
        let sampler = ResourceSampler::with_tick_rate(Some(100.0));
        let t0 = Instant::now();
        assert!(sampler.cpu_rate(t0, 100).is_none());
        let rate = sampler.cpu_rate(t0 + Duration::from_secs(1), 150).unwrap();
        assert!((rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_tick_rate_reports_no_cpu() {
        let sampler = ResourceSampler::with_tick_rate(None);
        let t0 = Instant::now();
        assert!(sampler.cpu_rate(t0, 100).is_none());
        assert!(sampler.cpu_rate(t0 + Duration::from_secs(1), 150).is_none());
        assert!(ResourceSampler::with_tick_rate(Some(0.0)).ticks_per_sec.is_none());

        let native = ResourceSampler::new();
        let procfs = cfg!(any(target_os = "linux", target_os = "android"));
        assert_eq!(native.ticks_per_sec.is_some(), procfs);
        if !procfs {
            assert!(native.sample().cpu_percent.is_none());
        }
    }

    #[test]
    fn test_check_limits() {
        let limits = ResourceLimits {
            sample_interval_ms: 10,
            max_memory_bytes: Some(1_000),
            max_cpu_percent: Some(80.0),
        };
        let over = ResourceUsageSnapshot {
            memory_bytes: Some(2_000),
            cpu_percent: Some(95.0),
        };
        assert_eq!(check_limits(&over, &limits).len(), 2);
        let unknown = ResourceUsageSnapshot::default();
        assert!(check_limits(&unknown, &limits).is_empty());
    }

    #[tokio::test]
    async fn test_monitor_warns_on_tiny_memory_limit() {
        let limits = ResourceLimits {
            sample_interval_ms: 5,
            max_memory_bytes: Some(1),
            max_cpu_percent: None,
        };
        let metrics = Arc::new(PipelineMetrics::new());
        let monitor = ResourceMonitor::spawn(
            "run-test".to_string(),
            limits,
            Arc::clone(&metrics),
            Arc::new(TracingSink),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        let warnings = monitor.finish().await;
        if cfg!(target_os = "linux") {
            assert!(!warnings.is_empty());
            assert_eq!(metrics.snapshot().resource_warnings, warnings.len() as u64);
        }
    }
}
