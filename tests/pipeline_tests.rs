use std::sync::Arc;

use anyhow::Result;
use notification_pipeline::{
    aggregation::WindowManager,
    clients::memory::{
        AllowAllPreferences, MemoryAggregationStore, MemoryAuditSink, MemoryEventSink,
        MemoryPreferences,
    },
    models::{
        audit::DeliveryOutcome,
        event::{NotificationEvent, NotificationType, Priority},
    },
    pipeline::{EventPipeline, PipelineOutcome, PreferenceProvider},
};

const READY_TOPIC: &str = "notifications.ready";

fn build_pipeline(
    preferences: Arc<dyn PreferenceProvider>,
) -> (Arc<MemoryEventSink>, Arc<MemoryAuditSink>, EventPipeline) {
    let store = Arc::new(MemoryAggregationStore::new());
    let windows = Arc::new(WindowManager::new(store, 120_000, 50));
    let sink = Arc::new(MemoryEventSink::new());
    let audit = Arc::new(MemoryAuditSink::new());

    let pipeline = EventPipeline::new(
        windows,
        sink.clone(),
        preferences,
        audit.clone(),
        READY_TOPIC.to_string(),
    );

    (sink, audit, pipeline)
}

fn event(event_type: NotificationType, priority: Priority, target: &str) -> NotificationEvent {
    NotificationEvent::new(
        event_type,
        priority,
        "actor-1".to_string(),
        "Ava".to_string(),
        target.to_string(),
    )
    .with_content("Title".to_string(), "Body".to_string())
}

/// Test: Preference-suppressed events are skipped and audited, not emitted
#[tokio::test]
async fn test_preference_filtered_event_not_emitted() -> Result<()> {
    let preferences = Arc::new(MemoryPreferences::new());
    preferences
        .suppress("user-9", NotificationType::DirectMessage)
        .await;

    let (sink, audit, pipeline) = build_pipeline(preferences);

    let outcome = pipeline
        .process(event(NotificationType::DirectMessage, Priority::High, "user-9"))
        .await?;

    assert_eq!(outcome, PipelineOutcome::Filtered);
    assert!(sink.published().await.is_empty(), "Nothing reaches the ready stream");

    let entries = audit.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, DeliveryOutcome::FilteredPrefs);

    Ok(())
}

/// Test: Channel allow-lists are attached per priority tier
#[tokio::test]
async fn test_channels_attached_by_priority() -> Result<()> {
    let cases = [
        (Priority::Critical, vec!["PUSH", "EMAIL", "SMS"]),
        (Priority::High, vec!["PUSH", "EMAIL"]),
        (Priority::Low, vec!["PUSH"]),
    ];

    for (priority, expected) in cases {
        let (sink, _, pipeline) = build_pipeline(Arc::new(AllowAllPreferences));

        let outcome = pipeline
            .process(event(NotificationType::Otp, priority, "user-9"))
            .await?;
        assert_eq!(outcome, PipelineOutcome::Emitted);

        let published = sink.published_to(READY_TOPIC).await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key, "user-9", "Ready stream is keyed by recipient");

        let resolved: NotificationEvent = published[0].decode()?;
        assert_eq!(
            resolved.metadata["channels"],
            serde_json::json!(expected),
            "Wrong channel set for {:?}",
            priority
        );
    }

    Ok(())
}

/// Test: A burst of 50 likes produces exactly one ready-stream emission
#[tokio::test]
async fn test_like_burst_single_ready_emission() -> Result<()> {
    let (sink, _, pipeline) = build_pipeline(Arc::new(AllowAllPreferences));

    let mut emitted = 0;
    let mut absorbed = 0;

    for i in 0..50 {
        let event = NotificationEvent::new(
            NotificationType::Like,
            Priority::Low,
            format!("actor-{}", i),
            format!("Actor {}", i),
            "user-9".to_string(),
        )
        .with_entity("post-1".to_string());

        match pipeline.process(event).await? {
            PipelineOutcome::Emitted => emitted += 1,
            PipelineOutcome::Absorbed => absorbed += 1,
            other => panic!("Unexpected outcome: {:?}", other),
        }
    }

    assert_eq!(emitted, 1);
    assert_eq!(absorbed, 49);

    let published = sink.published_to(READY_TOPIC).await;
    assert_eq!(published.len(), 1);

    let aggregate: NotificationEvent = published[0].decode()?;
    assert_eq!(aggregate.metadata["aggregated_count"], serde_json::json!(50));

    Ok(())
}

/// Test: A failed ready-stream publish surfaces the error and audits it
#[tokio::test]
async fn test_publish_failure_audits_failed_outcome() -> Result<()> {
    let (sink, audit, pipeline) = build_pipeline(Arc::new(AllowAllPreferences));
    sink.set_failing(true);

    let result = pipeline
        .process(event(NotificationType::Otp, Priority::Critical, "user-9"))
        .await;

    assert!(result.is_err(), "Publish failure must propagate for replay");

    let entries = audit.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, DeliveryOutcome::Failed);
    assert!(entries[0].error_message.is_some());

    Ok(())
}

/// Test: Successful emissions write a sent audit entry
#[tokio::test]
async fn test_successful_emission_audited_as_sent() -> Result<()> {
    let (_, audit, pipeline) = build_pipeline(Arc::new(AllowAllPreferences));

    let outcome = pipeline
        .process(event(NotificationType::SecurityAlert, Priority::Critical, "user-9"))
        .await?;

    assert_eq!(outcome, PipelineOutcome::Emitted);

    let entries = audit.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, DeliveryOutcome::Sent);
    assert_eq!(entries[0].target_id, "user-9");

    Ok(())
}
