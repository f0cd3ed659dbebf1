//! Notification fan-out as seen by subscribers of a live engine.

mod common;

use common::{drain_frames, TestHarness, API_TOKEN};
use galleryd::broadcast::{extract_token, BroadcastError, NotificationEvent};
use galleryd::engine::SubmitRequest;

#[test]
fn test_welcome_frame_then_lifecycle_event() {
    let harness = TestHarness::new();
    let mut sub = harness.subscribe();

    let job = harness
        .engine
        .submit(
            SubmitRequest::new(["https://example.com/g/1"])
                .with_post_title("Title")
                .with_label("lbl"),
        )
        .unwrap()
        .into_download();

    let frames = drain_frames(&mut sub);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["type"], "welcome");
    assert_eq!(frames[0]["message"], "notifications-ready");

    let event = &frames[1];
    assert_eq!(event["type"], "queued");
    assert_eq!(event["download_id"], job.id.to_string());
    assert_eq!(event["urls"][0], "https://example.com/g/1");
    assert_eq!(event["post_title"], "Title");
    assert_eq!(event["label"], "lbl");
    assert!(event["timestamp"].is_string());
}

#[test]
fn test_dropped_subscriber_is_pruned() {
    let harness = TestHarness::new();
    let mut subs: Vec<_> = (0..5).map(|_| harness.subscribe()).collect();
    assert_eq!(harness.broadcaster.subscriber_count(), 5);

    drop(subs.remove(2));

    let job = harness
        .engine
        .submit(SubmitRequest::new(["https://example.com/g/2"]))
        .unwrap()
        .into_download();
    assert_eq!(harness.broadcaster.subscriber_count(), 4);

    // Later events reach exactly the remaining four.
    let delivered = harness
        .broadcaster
        .broadcast(&NotificationEvent::from_download(&job));
    assert_eq!(delivered, 4);

    for sub in &mut subs {
        let kinds: Vec<_> = drain_frames(sub)
            .into_iter()
            .map(|f| f["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["welcome", "queued", "queued"]);
    }
}

#[test]
fn test_subscription_requires_token() {
    let harness = TestHarness::new();

    assert_eq!(
        harness.broadcaster.subscribe_with_token("nope").unwrap_err(),
        BroadcastError::Unauthorized
    );
    assert_eq!(harness.broadcaster.subscriber_count(), 0);

    let header = format!("Bearer {}", API_TOKEN);
    let token = extract_token(Some(header.as_str()), Some("ignored")).unwrap();
    assert!(harness.broadcaster.subscribe_with_token(token).is_ok());

    let token = extract_token(None, Some(API_TOKEN)).unwrap();
    assert!(harness.broadcaster.subscribe_with_token(token).is_ok());
    assert_eq!(harness.broadcaster.subscriber_count(), 2);
}

#[test]
fn test_stopped_broadcaster_rejects_and_forgets_subscribers() {
    let harness = TestHarness::new();
    let _sub = harness.subscribe();

    harness.broadcaster.stop();
    assert_eq!(harness.broadcaster.subscriber_count(), 0);
    assert_eq!(
        harness.broadcaster.subscribe().unwrap_err(),
        BroadcastError::Stopped
    );

    // Lifecycle operations still succeed with nobody listening.
    assert!(harness
        .engine
        .submit(SubmitRequest::new(["https://example.com/g/3"]))
        .unwrap()
        .is_created());
}

#[test]
fn test_unsubscribe_is_idempotent() {
    let harness = TestHarness::new();
    let sub = harness.subscribe();
    harness.broadcaster.unsubscribe(sub.id);
    harness.broadcaster.unsubscribe(sub.id);
    assert_eq!(harness.broadcaster.subscriber_count(), 0);
}
