// =============================================================================
// Host load monitor — adaptive scan throttling
// =============================================================================
//
// Samples CPU, memory, and radio-adapter health on a fixed cadence and
// throttles every scan loop one step when load crosses into critical. The
// trigger is edge-based: a sustained critical period throttles once on the
// crossing, not once per sample, so the interval cannot race to the cap in
// a few seconds of a long GC pause. Probe failures are logged and skipped;
// no throttling happens on missing data.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::scanner::ScanOrchestrator;
use crate::types::HardwareLoad;

/// Source of host load samples. Real deployments bind a procfs or sysinfo
/// probe here; tests and the simulated mode use the generator below.
#[async_trait]
pub trait LoadProbe: Send + Sync {
    async fn sample(&self) -> Result<HardwareLoad, EngineError>;
}

/// Random-walk load generator for simulated runs. Mostly healthy, with
/// occasional spikes into critical territory.
pub struct SimulatedLoadProbe {
    rng: Mutex<StdRng>,
    spike_prob: f64,
}

impl SimulatedLoadProbe {
    pub fn new() -> Self {
        Self::with_seed(rand::random(), 0.05)
    }

    pub fn with_seed(seed: u64, spike_prob: f64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            spike_prob,
        }
    }
}

impl Default for SimulatedLoadProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadProbe for SimulatedLoadProbe {
    async fn sample(&self) -> Result<HardwareLoad, EngineError> {
        let mut rng = self.rng.lock();
        let spike = rng.gen::<f64>() < self.spike_prob;
        Ok(HardwareLoad {
            cpu_percent: if spike {
                rng.gen_range(90.0..100.0)
            } else {
                rng.gen_range(10.0..70.0)
            },
            memory_percent: rng.gen_range(30.0..75.0),
            adapter_up: true,
        })
    }
}

/// Whether this sample should trigger a throttle step, given whether the
/// previous sample was already critical.
fn should_throttle(was_critical: bool, load: &HardwareLoad) -> bool {
    load.is_critical() && !was_critical
}

/// Sample `probe` every `interval` and throttle the orchestrator on each
/// healthy-to-critical crossing. Runs until the task is aborted.
pub async fn run_load_monitor(
    orchestrator: Arc<ScanOrchestrator>,
    probe: Arc<dyn LoadProbe>,
    interval: Duration,
) {
    info!(interval_secs = interval.as_secs(), "load monitor started");
    let mut was_critical = false;

    loop {
        tokio::time::sleep(interval).await;

        let load = match probe.sample().await {
            Ok(load) => load,
            Err(e) => {
                warn!(error = %e, "load probe failed, skipping sample");
                continue;
            }
        };

        if should_throttle(was_critical, &load) {
            warn!(
                cpu = format!("{:.0}", load.cpu_percent),
                memory = format!("{:.0}", load.memory_percent),
                adapter_up = load.adapter_up,
                "host load critical, throttling scan loops"
            );
            orchestrator.throttle_all();
        } else {
            debug!(
                cpu = format!("{:.0}", load.cpu_percent),
                memory = format!("{:.0}", load.memory_percent),
                "load sample"
            );
        }
        was_critical = load.is_critical();
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn load(cpu: f64, memory: f64, adapter_up: bool) -> HardwareLoad {
        HardwareLoad {
            cpu_percent: cpu,
            memory_percent: memory,
            adapter_up,
        }
    }

    #[test]
    fn throttles_only_on_the_crossing() {
        // healthy -> critical: throttle.
        assert!(should_throttle(false, &load(95.0, 50.0, true)));
        // critical -> still critical: no second step.
        assert!(!should_throttle(true, &load(95.0, 50.0, true)));
        // healthy -> healthy: nothing.
        assert!(!should_throttle(false, &load(40.0, 40.0, true)));
        // recovered then critical again: a fresh step.
        assert!(should_throttle(false, &load(10.0, 10.0, false)));
    }

    #[tokio::test]
    async fn simulated_probe_yields_plausible_samples() {
        let probe = SimulatedLoadProbe::with_seed(9, 0.0);
        for _ in 0..20 {
            let sample = probe.sample().await.unwrap();
            assert!((0.0..=100.0).contains(&sample.cpu_percent));
            assert!((0.0..=100.0).contains(&sample.memory_percent));
            assert!(!sample.is_critical());
        }
    }

    #[tokio::test]
    async fn spiking_probe_produces_critical_samples() {
        let probe = SimulatedLoadProbe::with_seed(9, 1.0);
        let sample = probe.sample().await.unwrap();
        assert!(sample.is_critical());
    }
}
