use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    config::VerificationPolicy,
    models::audit::AuditEvent,
    services::{audit::AuditLog, nonces::NonceStore, sessions::SessionManager},
};

/// Counters from one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub timed_out: usize,
    pub nonces_purged: u64,
    pub audit_purged: u64,
}

/// Periodic housekeeping: session timeouts, nonce purge, audit retention.
///
/// Talks to sessions only through [`SessionManager`]. A failing step is
/// logged and the pass moves on.
#[derive(Clone)]
pub struct Sweeper {
    sessions: SessionManager,
    nonces: NonceStore,
    audit: AuditLog,
    policy: VerificationPolicy,
}

impl Sweeper {
    pub fn new(
        sessions: SessionManager,
        nonces: NonceStore,
        audit: AuditLog,
        policy: VerificationPolicy,
    ) -> Self {
        Self {
            sessions,
            nonces,
            audit,
            policy,
        }
    }

    /// Runs one pass.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = Utc::now();

        match self.sessions.sweep_timeouts().await {
            Ok(count) => report.timed_out = count,
            Err(e) => tracing::error!("❌ Session timeout sweep failed: {}", e),
        }

        match self.nonces.purge_expired(now).await {
            Ok(purged) => {
                report.nonces_purged = purged;
                if purged > 0 {
                    if let Err(e) = self
                        .audit
                        .record(
                            AuditEvent::NoncePurge,
                            None,
                            None,
                            sonic_rs::json!({ "purged": purged }),
                        )
                        .await
                    {
                        tracing::error!("❌ Failed to audit nonce purge: {}", e);
                    }
                }
            }
            Err(e) => tracing::error!("❌ Nonce purge failed: {}", e),
        }

        let cutoff = TimeDelta::from_std(self.policy.audit_retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention));
        if let Some(cutoff) = cutoff {
            match self.audit.purge_older_than(cutoff).await {
                Ok(purged) => report.audit_purged = purged,
                Err(e) => tracing::error!("❌ Audit retention purge failed: {}", e),
            }
        }

        report
    }

    /// Runs passes every `sweep_interval` until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.policy.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            "✅ Background sweep started (runs every {}s)",
            self.policy.sweep_interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Background sweep stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let report = self.sweep_once().await;
                    if report != SweepReport::default() {
                        tracing::info!(
                            "🧹 Sweep: {} sessions timed out, {} nonces purged, {} audit entries purged",
                            report.timed_out,
                            report.nonces_purged,
                            report.audit_purged
                        );
                    }
                }
            }
        }
    }
}
