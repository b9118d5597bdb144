//! End-to-end engine scenarios driven by the virtual-clock scheduler.

use std::sync::Arc;
use std::time::Duration;

use mock_channel::{ManualScheduler, MockChannel, StaticAvailability, StaticRecipients};
use vigil_core::{
    AlertDraft, AlertMetadata, AlertSeverity, AlertStatus, AvailabilityStatus, ChannelKind,
    UserAvailability, ValidationError,
};
use vigil_engine::{
    AlertEngine, EngineConfig, InteractionAction, InteractionEvent,
};

struct Harness {
    engine: Arc<AlertEngine>,
    scheduler: Arc<ManualScheduler>,
    in_app: Arc<MockChannel>,
    push: Arc<MockChannel>,
    availability: Arc<StaticAvailability>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default(), 0)
    }

    /// `in_app_failures` scripts the in-app adapter to fail its first N
    /// sends for retry scenarios.
    fn with_config(config: EngineConfig, in_app_failures: usize) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let scheduler = Arc::new(ManualScheduler::new());
        let in_app = Arc::new(MockChannel::failing(ChannelKind::InApp, in_app_failures));
        let push = Arc::new(MockChannel::new(ChannelKind::Push));
        let availability = Arc::new(StaticAvailability::all_available());

        let engine = AlertEngine::builder(
            Arc::new(StaticRecipients::single("alice")),
            availability.clone(),
        )
        .config(config)
        .scheduler(scheduler.clone())
        .adapter(in_app.clone())
        .adapter(push.clone())
        .adapter(Arc::new(MockChannel::new(ChannelKind::Sms)))
        .adapter(Arc::new(MockChannel::new(ChannelKind::Email)))
        .build();
        engine.start();

        Self {
            engine,
            scheduler,
            in_app,
            push,
            availability,
        }
    }

    async fn advance_secs(&self, secs: u64) {
        self.scheduler.advance(Duration::from_secs(secs)).await;
    }
}

fn draft(severity: AlertSeverity) -> AlertDraft {
    AlertDraft::new(
        "disk almost full",
        "/var is at 94%",
        severity,
        AlertMetadata::System {
            hostname: "db-3".into(),
            service: "postgres".into(),
            check: Some("disk_usage".into()),
        },
    )
    .source("monitor")
}

#[tokio::test]
async fn test_create_delivers_on_next_tick() {
    let h = Harness::new();
    let alert = h.engine.create_alert(draft(AlertSeverity::Low)).await;

    // Nothing leaves the queue until the drain tick.
    assert_eq!(h.in_app.send_count(), 0);

    h.advance_secs(5).await;
    assert_eq!(h.in_app.send_count(), 1);
    assert_eq!(h.in_app.sends()[0].user_id, "alice");

    let alert = h.engine.alert(&alert.id).await.unwrap();
    assert_eq!(alert.delivery_attempts.len(), 1);
    assert!(alert.delivery_attempts[0].success);
}

#[tokio::test]
async fn test_acknowledge_cancels_escalation() {
    let h = Harness::new();
    let alert = h.engine.create_alert(draft(AlertSeverity::Critical)).await;

    assert!(h.engine.acknowledge_alert(&alert.id, "alice").await);
    // A second acknowledge is an illegal transition.
    assert!(!h.engine.acknowledge_alert(&alert.id, "alice").await);

    // Well past every escalation delay; the level must not move.
    h.advance_secs(4 * 3600).await;
    let alert = h.engine.alert(&alert.id).await.unwrap();
    assert_eq!(alert.status, AlertStatus::Acknowledged);
    assert_eq!(alert.escalation_level, 0);
}

#[tokio::test]
async fn test_critical_alert_escalates_through_levels() {
    let h = Harness::new();
    let alert = h.engine.create_alert(draft(AlertSeverity::Critical)).await;

    // Critical base delay is 5 minutes; first step fires at t=300.
    h.advance_secs(300).await;
    let snapshot = h.engine.alert(&alert.id).await.unwrap();
    assert_eq!(snapshot.status, AlertStatus::Escalated);
    assert_eq!(snapshot.escalation_level, 1);
    // Level 1 delivers through the first escalation channel (push), on top
    // of the initial fan-out.
    assert_eq!(h.push.send_count(), 2);

    // The delay grows with the level: step 2 at +600, step 3 at +1500.
    // Level 3 is the cap.
    h.advance_secs(600 + 1500).await;
    let snapshot = h.engine.alert(&alert.id).await.unwrap();
    assert_eq!(snapshot.escalation_level, 3);

    h.advance_secs(4 * 3600).await;
    let snapshot = h.engine.alert(&alert.id).await.unwrap();
    assert_eq!(snapshot.escalation_level, 3);
}

#[tokio::test]
async fn test_do_not_disturb_suppresses_escalation() {
    let h = Harness::new();
    h.availability.set(
        "alice",
        UserAvailability::new(AvailabilityStatus::DoNotDisturb),
    );
    let alert = h.engine.create_alert(draft(AlertSeverity::High)).await;

    // High base delay is 30 minutes.
    h.advance_secs(4 * 3600).await;
    let snapshot = h.engine.alert(&alert.id).await.unwrap();
    assert_eq!(snapshot.escalation_level, 0);
    assert_eq!(snapshot.status, AlertStatus::Active);
}

#[tokio::test]
async fn test_away_user_gets_recheck_then_escalation() {
    let h = Harness::new();
    h.availability
        .set("alice", UserAvailability::new(AvailabilityStatus::Away));
    let alert = h.engine.create_alert(draft(AlertSeverity::High)).await;

    // Timer fires at 30 minutes but the user is away: recheck, no step.
    h.advance_secs(1800).await;
    assert_eq!(h.engine.alert(&alert.id).await.unwrap().escalation_level, 0);

    // Back at the keyboard before the 30-minute recheck fires.
    h.availability
        .set("alice", UserAvailability::available());
    h.advance_secs(1800).await;
    let snapshot = h.engine.alert(&alert.id).await.unwrap();
    assert_eq!(snapshot.escalation_level, 1);
    assert_eq!(snapshot.status, AlertStatus::Escalated);
}

#[tokio::test]
async fn test_interaction_suppresses_escalation() {
    let h = Harness::new();
    let alert = h.engine.create_alert(draft(AlertSeverity::High)).await;

    h.engine
        .record_interaction(InteractionEvent::new(
            "alice",
            &alert.id,
            alert.category,
            "disk_usage",
            InteractionAction::Clicked,
        ))
        .await;

    h.advance_secs(4 * 3600).await;
    assert_eq!(h.engine.alert(&alert.id).await.unwrap().escalation_level, 0);
}

#[tokio::test]
async fn test_snooze_validation() {
    let h = Harness::new();
    let critical = h.engine.create_alert(draft(AlertSeverity::Critical)).await;
    let low = h.engine.create_alert(draft(AlertSeverity::Low)).await;

    // Critical is not in the default allowed set.
    assert_eq!(
        h.engine.snooze_alert(&critical.id, "alice", 30).await,
        Err(ValidationError::SnoozeNotAllowed("critical".to_string()))
    );

    // Past the default 480-minute maximum.
    assert_eq!(
        h.engine.snooze_alert(&low.id, "alice", 600).await,
        Err(ValidationError::SnoozeTooLong {
            requested: 600,
            max: 480
        })
    );

    // Unknown alert is not an error, just a no-op.
    assert_eq!(h.engine.snooze_alert("nope", "alice", 30).await, Ok(false));
}

#[tokio::test]
async fn test_snooze_expiry_reactivates_and_rearms_escalation() {
    let h = Harness::new();
    let alert = h.engine.create_alert(draft(AlertSeverity::High)).await;

    // Zero duration means the user's default (30 minutes).
    assert_eq!(h.engine.snooze_alert(&alert.id, "alice", 0).await, Ok(true));
    let snapshot = h.engine.alert(&alert.id).await.unwrap();
    assert_eq!(snapshot.status, AlertStatus::Snoozed);
    assert!(snapshot.snoozed_until.is_some());

    // Snooze expires; the alert wakes up with escalation re-armed.
    h.advance_secs(1800).await;
    let snapshot = h.engine.alert(&alert.id).await.unwrap();
    assert_eq!(snapshot.status, AlertStatus::Active);
    assert!(snapshot.snoozed_until.is_none());

    // High base delay: 30 minutes from reactivation.
    h.advance_secs(1800).await;
    let snapshot = h.engine.alert(&alert.id).await.unwrap();
    assert_eq!(snapshot.escalation_level, 1);
}

#[tokio::test]
async fn test_failed_delivery_retries_until_success() {
    let h = Harness::with_config(EngineConfig::default(), 2);
    let alert = h.engine.create_alert(draft(AlertSeverity::Low)).await;

    // Initial attempt fails at t=5; retries at +30 and +60 (second one
    // succeeds).
    h.advance_secs(5).await;
    h.advance_secs(30).await;
    h.advance_secs(30).await;

    let snapshot = h.engine.alert(&alert.id).await.unwrap();
    let attempts = &snapshot.delivery_attempts;
    assert_eq!(attempts.len(), 3);
    assert_eq!(
        attempts.iter().map(|a| a.retry_count).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(
        attempts.iter().map(|a| a.success).collect::<Vec<_>>(),
        vec![false, false, true]
    );
    assert_eq!(h.in_app.send_count(), 1);
}

#[tokio::test]
async fn test_resolve_stops_pending_retries() {
    let h = Harness::with_config(EngineConfig::default(), 10);
    let alert = h.engine.create_alert(draft(AlertSeverity::Low)).await;

    h.advance_secs(5).await;
    assert!(h.engine.resolve_alert(&alert.id, "alice").await);

    h.advance_secs(3600).await;
    let snapshot = h.engine.alert(&alert.id).await.unwrap();
    // Only the pre-resolve attempt is on record.
    assert_eq!(snapshot.delivery_attempts.len(), 1);
    assert_eq!(snapshot.status, AlertStatus::Resolved);
    assert_eq!(snapshot.resolved_by.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_active_alerts_sorted_by_severity_then_recency() {
    let h = Harness::new();
    let low = h.engine.create_alert(draft(AlertSeverity::Low)).await;
    let critical = h.engine.create_alert(draft(AlertSeverity::Critical)).await;
    let medium = h.engine.create_alert(draft(AlertSeverity::Medium)).await;
    let resolved = h.engine.create_alert(draft(AlertSeverity::High)).await;
    h.engine.resolve_alert(&resolved.id, "alice").await;

    let active = h.engine.active_alerts().await;
    let ids: Vec<&str> = active.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec![&critical.id, &medium.id, &low.id]);
}

#[tokio::test]
async fn test_statistics() {
    let h = Harness::new();
    for severity in AlertSeverity::all() {
        h.engine.create_alert(draft(severity)).await;
    }
    let resolved = h.engine.create_alert(draft(AlertSeverity::Low)).await;
    h.engine.resolve_alert(&resolved.id, "alice").await;

    let stats = h.engine.statistics().await;
    assert_eq!(stats.total, 5);
    assert_eq!(stats.active, 4);
    assert_eq!(stats.by_severity[&AlertSeverity::Low], 2);
    assert_eq!(stats.by_severity[&AlertSeverity::Critical], 1);
    assert_eq!(stats.by_status["resolved"], 1);
    assert_eq!(stats.by_status["active"], 4);
}

#[tokio::test]
async fn test_subscribers_receive_snapshots() {
    let h = Harness::new();
    let (id, mut rx) = h.engine.subscribe().await;

    // Current snapshot arrives immediately.
    assert!(rx.recv().await.unwrap().is_empty());

    let alert = h.engine.create_alert(draft(AlertSeverity::Medium)).await;
    let snapshot = rx.recv().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, alert.id);

    h.engine.resolve_alert(&alert.id, "alice").await;
    assert!(rx.recv().await.unwrap().is_empty());

    h.engine.unsubscribe(id);
    h.engine.create_alert(draft(AlertSeverity::Low)).await;
    // Sender side dropped; the channel ends after buffered snapshots.
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_purge_drops_resolved_past_retention() {
    let config = EngineConfig::builder().retention_days(0).build();
    let h = Harness::with_config(config, 0);

    let resolved = h.engine.create_alert(draft(AlertSeverity::Low)).await;
    let open = h.engine.create_alert(draft(AlertSeverity::High)).await;
    h.engine.resolve_alert(&resolved.id, "alice").await;

    assert_eq!(h.engine.purge_expired().await, 1);
    assert!(h.engine.alert(&resolved.id).await.is_none());
    assert!(h.engine.alert(&open.id).await.is_some());

    // Nothing left to purge.
    assert_eq!(h.engine.purge_expired().await, 0);
}

#[tokio::test]
async fn test_delivered_alert_surfaces_into_a_group() {
    let h = Harness::new();
    let alert = h.engine.create_alert(draft(AlertSeverity::Medium)).await;
    h.advance_secs(5).await;

    let groups = h.engine.grouping().groups().await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].members, vec![format!("{}:alice", alert.id)]);

    // Resolving removes the surfaced notification and its empty group.
    h.engine.resolve_alert(&alert.id, "alice").await;
    assert!(h.engine.grouping().groups().await.is_empty());
}
