use crate::error::Result;
use crate::models::{DeliveryState, Reason};
use crate::storage::EventingStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Outcome of one reaper sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Rows moved to `Expired` after exhausting their delivery budget
    pub poisoned: usize,

    /// Rows moved to `Expired` after outliving their subscription TTL
    pub expired: usize,
}

/// Background lease sweep
///
/// Correctness does not depend on it: `consume_next` lazily reclaims lapsed
/// leases, expires TTL breaches and poisons exhausted rows at read time. The
/// reaper converges audit state for subscriptions that see no consumer
/// traffic.
pub struct LeaseReaper {
    store: Arc<dyn EventingStore>,
    check_interval_secs: u64,
}

impl LeaseReaper {
    pub fn new(store: Arc<dyn EventingStore>) -> Self {
        Self {
            store,
            check_interval_secs: 30,
        }
    }

    /// Set the sweep interval
    pub fn with_check_interval(mut self, interval_secs: u64) -> Self {
        self.check_interval_secs = interval_secs;
        self
    }

    /// Run the sweep loop
    pub async fn run_monitor(self: Arc<Self>) {
        tracing::info!(
            check_interval = self.check_interval_secs,
            "Starting lease reaper"
        );

        loop {
            if let Err(e) = self.sweep_once().await {
                tracing::error!(error = %e, "Lease sweep failed");
            }

            sleep(Duration::from_secs(self.check_interval_secs)).await;
        }
    }

    /// Sweep every subscription once
    pub async fn sweep_once(&self) -> Result<SweepStats> {
        let now = Utc::now();
        let mut stats = SweepStats::default();

        for subscription in self.store.list_subscriptions().await? {
            let rows = self
                .store
                .deliveries_for_subscription(&subscription.id)
                .await?;

            for row in rows {
                if row.state.is_terminal() {
                    continue;
                }

                // Active leases are left to resolve or lapse on their own
                let under_active_lease =
                    row.state == DeliveryState::InProgress && row.invisible_until > now;
                if under_active_lease {
                    continue;
                }

                if row.ttl_breached(subscription.ttl_secs, now) {
                    if self
                        .store
                        .expire_delivery(&row.id, row.delivery_count, Reason::TtlElapsed, now)
                        .await?
                    {
                        stats.expired += 1;
                    }
                } else if row.delivery_count + 1 > subscription.max_deliveries {
                    if self
                        .store
                        .expire_delivery(
                            &row.id,
                            row.delivery_count,
                            Reason::MaxDeliveriesReached,
                            now,
                        )
                        .await?
                    {
                        stats.poisoned += 1;
                    }
                }
            }
        }

        if stats != SweepStats::default() {
            tracing::info!(
                poisoned = stats.poisoned,
                expired = stats.expired,
                "Lease sweep reclaimed deliveries"
            );
        }
        Ok(stats)
    }
}
