//! Lease-based leader election
//!
//! Only the holder of a `coordination.k8s.io/v1` Lease runs the release task,
//! so the replicas of one Deployment never rewrite the records at the same
//! time. The holder renews every retry period. Another replica takes over
//! once the lease has gone unrenewed for its full duration, and a holder that
//! cannot renew within the renew deadline stops acting as leader.
//!
//! Acquire and renew are whole-object replaces carrying the resource version
//! that was read, so two candidates racing for an expired lease cannot both win.

use chrono::{DateTime, TimeDelta, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::Client;
use kube::api::{Api, PostParams};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Lease identity and timings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseSettings {
    pub name: String,
    pub namespace: String,
    /// This replica's holder identity
    pub identity: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

impl LeaseSettings {
    /// Settings with the usual controller timings (15s / 10s / 2s).
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            identity: identity.into(),
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }
}

/// What a candidate should do with the lease as it currently reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseAction {
    /// We hold it; extend it
    Renew,
    /// Free or expired; take it
    Acquire,
    /// Someone else holds a live lease
    Wait,
}

/// Decides how `identity` should treat `spec` at `now`.
///
/// A lease without a holder or renew time is free. A lease without a
/// duration uses `default_duration`.
pub fn decide(spec: Option<&LeaseSpec>, identity: &str, default_duration: Duration, now: DateTime<Utc>) -> LeaseAction {
    let Some(spec) = spec else {
        return LeaseAction::Acquire;
    };
    match spec.holder_identity.as_deref() {
        None | Some("") => return LeaseAction::Acquire,
        Some(holder) if holder == identity => return LeaseAction::Renew,
        Some(_) => {}
    }
    let Some(MicroTime(renewed)) = spec.renew_time.as_ref() else {
        return LeaseAction::Acquire;
    };
    let duration = spec
        .lease_duration_seconds
        .filter(|secs| *secs > 0)
        .map_or_else(
            || TimeDelta::from_std(default_duration).unwrap_or(TimeDelta::MAX),
            |secs| TimeDelta::seconds(i64::from(secs)),
        );
    match renewed.checked_add_signed(duration) {
        Some(expiry) if expiry <= now => LeaseAction::Acquire,
        _ => LeaseAction::Wait,
    }
}

/// Spec to write for `action`, starting from the one read.
pub fn next_spec(
    current: Option<&LeaseSpec>,
    identity: &str,
    lease_duration: Duration,
    action: LeaseAction,
    now: DateTime<Utc>,
) -> LeaseSpec {
    let mut spec = current.cloned().unwrap_or_default();
    if action == LeaseAction::Acquire {
        let previous = spec.holder_identity.as_deref().filter(|holder| !holder.is_empty());
        if previous.is_some_and(|holder| holder != identity) {
            spec.lease_transitions = Some(spec.lease_transitions.unwrap_or(0).saturating_add(1));
        } else if spec.lease_transitions.is_none() {
            spec.lease_transitions = Some(0);
        }
        spec.holder_identity = Some(identity.to_string());
        spec.acquire_time = Some(MicroTime(now));
    }
    spec.lease_duration_seconds = Some(i32::try_from(lease_duration.as_secs()).unwrap_or(i32::MAX));
    spec.renew_time = Some(MicroTime(now));
    spec
}

/// Keeps trying to hold the lease and publishes whether this replica leads.
pub struct LeaderElector {
    leases: Api<Lease>,
    settings: LeaseSettings,
    leading: watch::Sender<bool>,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector").field("settings", &self.settings).finish_non_exhaustive()
    }
}

impl LeaderElector {
    /// Returns the elector and a receiver that reads `true` while we lead.
    pub fn new(client: Client, settings: LeaseSettings) -> (Self, watch::Receiver<bool>) {
        let (leading, receiver) = watch::channel(false);
        let elector = Self {
            leases: Api::namespaced(client, &settings.namespace),
            settings,
            leading,
        };
        (elector, receiver)
    }

    /// Runs until the task is dropped.
    pub async fn run(self) {
        info!(
            lease = %self.settings.name,
            namespace = %self.settings.namespace,
            identity = %self.settings.identity,
            "Leader election started"
        );
        let mut ticker = interval(self.settings.retry_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_renewed: Option<Instant> = None;

        loop {
            ticker.tick().await;
            match self.try_acquire_or_renew(Utc::now()).await {
                Ok(true) => {
                    last_renewed = Some(Instant::now());
                    self.set_leading(true);
                }
                Ok(false) => {
                    last_renewed = None;
                    self.set_leading(false);
                }
                Err(e) => {
                    warn!(error = %e, lease = %self.settings.name, "Lease acquire/renew failed");
                    let expired = last_renewed.is_none_or(|at| at.elapsed() >= self.settings.renew_deadline);
                    if expired {
                        last_renewed = None;
                        self.set_leading(false);
                    }
                }
            }
        }
    }

    fn set_leading(&self, leading: bool) {
        let changed = self.leading.send_if_modified(|current| {
            let changed = *current != leading;
            *current = leading;
            changed
        });
        if changed && leading {
            info!(identity = %self.settings.identity, "Became leader");
        } else if changed {
            warn!(identity = %self.settings.identity, "Lost leadership");
        }
    }

    /// One election round; `Ok(true)` means we hold the lease afterwards.
    async fn try_acquire_or_renew(&self, now: DateTime<Utc>) -> Result<bool, kube::Error> {
        let settings = &self.settings;
        let Some(mut lease) = self.leases.get_opt(&settings.name).await? else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(settings.name.clone()),
                    namespace: Some(settings.namespace.clone()),
                    ..Default::default()
                },
                spec: Some(next_spec(None, &settings.identity, settings.lease_duration, LeaseAction::Acquire, now)),
            };
            return match self.leases.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok(true),
                Err(e) if is_lost_race(&e) => Ok(false),
                Err(e) => Err(e),
            };
        };

        let action = decide(lease.spec.as_ref(), &settings.identity, settings.lease_duration, now);
        if action == LeaseAction::Wait {
            debug!(holder = ?lease.spec.as_ref().and_then(|s| s.holder_identity.as_ref()), "Lease held elsewhere");
            return Ok(false);
        }
        lease.spec = Some(next_spec(
            lease.spec.as_ref(),
            &settings.identity,
            settings.lease_duration,
            action,
            now,
        ));
        match self.leases.replace(&settings.name, &PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            Err(e) if is_lost_race(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// 409: another candidate created or updated the lease first.
fn is_lost_race(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(status) if status.code == 409)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const DURATION: Duration = Duration::from_secs(15);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).single().unwrap()
    }

    fn held_by(holder: &str, renewed_secs_ago: i64) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(holder.to_string()),
            lease_duration_seconds: Some(15),
            renew_time: Some(MicroTime(now() - TimeDelta::seconds(renewed_secs_ago))),
            acquire_time: Some(MicroTime(now() - TimeDelta::seconds(600))),
            lease_transitions: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_or_unheld_lease_is_acquired() {
        assert_eq!(decide(None, "pod-a", DURATION, now()), LeaseAction::Acquire);
        assert_eq!(decide(Some(&LeaseSpec::default()), "pod-a", DURATION, now()), LeaseAction::Acquire);
        let mut spec = held_by("", 1);
        assert_eq!(decide(Some(&spec), "pod-a", DURATION, now()), LeaseAction::Acquire);
        spec = held_by("pod-b", 1);
        spec.renew_time = None;
        assert_eq!(decide(Some(&spec), "pod-a", DURATION, now()), LeaseAction::Acquire);
    }

    #[test]
    fn test_live_lease_held_elsewhere_waits() {
        assert_eq!(decide(Some(&held_by("pod-b", 14)), "pod-a", DURATION, now()), LeaseAction::Wait);
    }

    #[test]
    fn test_expired_lease_is_taken_over() {
        assert_eq!(decide(Some(&held_by("pod-b", 15)), "pod-a", DURATION, now()), LeaseAction::Acquire);
        assert_eq!(decide(Some(&held_by("pod-b", 300)), "pod-a", DURATION, now()), LeaseAction::Acquire);
    }

    #[test]
    fn test_own_lease_is_renewed_even_if_stale() {
        assert_eq!(decide(Some(&held_by("pod-a", 300)), "pod-a", DURATION, now()), LeaseAction::Renew);
    }

    #[test]
    fn test_missing_duration_uses_default() {
        let mut spec = held_by("pod-b", 20);
        spec.lease_duration_seconds = None;
        assert_eq!(decide(Some(&spec), "pod-a", Duration::from_secs(30), now()), LeaseAction::Wait);
        assert_eq!(decide(Some(&spec), "pod-a", DURATION, now()), LeaseAction::Acquire);
    }

    #[test]
    fn test_takeover_bumps_transitions() {
        let current = held_by("pod-b", 60);
        let spec = next_spec(Some(&current), "pod-a", DURATION, LeaseAction::Acquire, now());

        assert_eq!(spec.holder_identity.as_deref(), Some("pod-a"));
        assert_eq!(spec.lease_transitions, Some(4));
        assert_eq!(spec.acquire_time, Some(MicroTime(now())));
        assert_eq!(spec.renew_time, Some(MicroTime(now())));
        assert_eq!(spec.lease_duration_seconds, Some(15));
    }

    #[test]
    fn test_renew_keeps_acquire_time() {
        let current = held_by("pod-a", 2);
        let spec = next_spec(Some(&current), "pod-a", DURATION, LeaseAction::Renew, now());

        assert_eq!(spec.acquire_time, current.acquire_time);
        assert_eq!(spec.lease_transitions, Some(3));
        assert_eq!(spec.renew_time, Some(MicroTime(now())));
    }

    #[test]
    fn test_first_acquire_starts_at_zero_transitions() {
        let spec = next_spec(None, "pod-a", DURATION, LeaseAction::Acquire, now());
        assert_eq!(spec.lease_transitions, Some(0));
        assert_eq!(spec.holder_identity.as_deref(), Some("pod-a"));
    }
}
