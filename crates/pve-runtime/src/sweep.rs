//! Periodic closing sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::RuntimeEvent;
use crate::service::PatrolService;

/// Run `close_expired_rounds` every `interval` until `cancel` fires.
///
/// Failures are logged and retried on the next tick.
pub async fn run_sweep_loop(
    service: Arc<PatrolService>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(interval_secs = interval.as_secs(), "closing sweep started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("closing sweep stopping");
                break;
            }
            _ = ticker.tick() => {
                match service.close_expired_rounds().await {
                    Ok(report) if report.is_noop() => {
                        tracing::debug!("closing sweep: nothing to close");
                    }
                    Ok(report) => {
                        if !report.truncated_factories.is_empty() {
                            tracing::info!(
                                factories = ?report.truncated_factories,
                                "closing sweep bounded, continuing next tick"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "closing sweep failed");
                        service.publish_log("ERROR", format!("closing sweep failed: {e}"));
                    }
                }
            }
        }
    }
}

pub fn spawn_sweep(
    service: Arc<PatrolService>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_sweep_loop(service, interval, cancel))
}

impl PatrolService {
    pub fn publish_log(&self, level: &str, msg: String) {
        self.publish_event(RuntimeEvent::Log {
            level: level.to_string(),
            msg,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use pve_db::MemoryStore;
    use pve_reconcile::Schedule;
    use pve_schemas::{ScanPoint, ShiftDef, TimeOfDay};

    use crate::{FixedClock, RuntimeSettings};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        chrono_tz::Asia::Kolkata
            .with_ymd_and_hms(2024, 3, 1, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn loop_closes_rounds_then_stops_on_cancel() {
        let shift = ShiftDef::new(
            1,
            TimeOfDay::parse("09:00").unwrap(),
            TimeOfDay::parse("10:00").unwrap(),
        );
        let svc = Arc::new(PatrolService::new(
            Schedule::new(chrono_tz::Asia::Kolkata, 300, vec![shift]),
            RuntimeSettings::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(FixedClock::new(at(10, 10))),
        ));
        let point: ScanPoint = serde_json::from_value(serde_json::json!({
            "id": "P1", "factory_id": "F1", "route_id": "R1", "sequence_order": 1
        }))
        .unwrap();
        svc.upsert_scan_point(point, Some(at(0, 0))).await.unwrap();

        let mut rx = svc.subscribe();
        let cancel = CancellationToken::new();
        let handle = spawn_sweep(svc.clone(), Duration::from_millis(10), cancel.clone());

        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(RuntimeEvent::RoundsClosed { round_ids, missed, .. }) = rx.recv().await {
                    return (round_ids, missed);
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(closed.0.len(), 1);
        assert_eq!(closed.0[0].to_string(), "R1:2024-03-01:1");
        assert_eq!(closed.1, 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(svc.close_expired_rounds().await.unwrap().is_noop());
    }
}
