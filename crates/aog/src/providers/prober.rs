//! Periodic health prober
//!
//! Runs on a bounded cooperative schedule with per-provider backoff: 5 s
//! initial, doubling to a 60 s cap while a provider is unhealthy, constant
//! 60 s while healthy. Verdicts are collected first and applied at the end
//! of the cycle so transitions stay monotone within it. Dispatch never waits
//! on this loop; the scheduler reads the registry's cached status.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::transport::TransportFactory;
use super::ProviderRegistry;

const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
const STEADY_INTERVAL: Duration = Duration::from_secs(60);

struct ProbeSchedule {
    next_probe: Instant,
    backoff: Duration,
}

pub struct HealthProber {
    registry: ProviderRegistry,
    transports: TransportFactory,
}

impl HealthProber {
    pub fn new(registry: ProviderRegistry, transports: TransportFactory) -> Self {
        Self {
            registry,
            transports,
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(self, shutdown: CancellationToken) {
        info!("health prober started");
        let mut schedule: HashMap<String, ProbeSchedule> = HashMap::new();
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("health prober stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let names = self.registry.all_names().await;
            schedule.retain(|name, _| names.contains(name));

            // Probe due providers, collect verdicts, then apply them in one
            // pass at the end of the cycle.
            let mut verdicts = Vec::new();
            for name in names {
                let entry = schedule.entry(name.clone()).or_insert(ProbeSchedule {
                    next_probe: now,
                    backoff: INITIAL_BACKOFF,
                });
                if entry.next_probe > now {
                    continue;
                }

                let Some((provider, _)) = self.registry.snapshot(&name).await else {
                    continue;
                };
                let transport = self.transports.for_provider(&provider);
                let healthy = match transport.health_probe().await {
                    Ok(()) => true,
                    Err(error) => {
                        debug!(provider = %name, %error, "health probe failed");
                        false
                    }
                };

                if healthy {
                    entry.next_probe = now + STEADY_INTERVAL;
                    entry.backoff = INITIAL_BACKOFF;
                } else {
                    entry.next_probe = now + entry.backoff;
                    entry.backoff = (entry.backoff * 2).min(STEADY_INTERVAL);
                }
                verdicts.push((name, healthy));
            }

            for (name, healthy) in verdicts {
                self.registry.apply_probe(&name, healthy).await;
            }
        }
    }
}
