// Unread polling loop tests
// Batches are delivered whole and in order, and the loop stops on cancellation or error

mod common;
use common::{api_for, text_payload, unread_group, ScriptedSession};

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use serde_json::json;
use wapi_bridge::wapi::{CancelToken, PollState, UnreadPoller};

const TICK: Duration = Duration::from_millis(5);

#[tokio::test]
async fn test_two_batches_then_cancel() {
    let token = CancelToken::new();
    let session = Arc::new(
        ScriptedSession::full()
            .reply(
                "getUnreadMessages",
                json!([
                    unread_group("1@c.us", "One", vec![text_payload("1", 10, "a"), text_payload("1", 11, "b")]),
                    unread_group("2@c.us", "Two", vec![text_payload("2", 12, "c")]),
                ]),
            )
            .reply(
                "getUnreadMessages",
                json!([unread_group("3@c.us", "Three", vec![text_payload("3", 20, "d")])]),
            )
            .reply("getUnreadMessages", json!([]))
            .cancel_when_drained("getUnreadMessages", token.clone()),
    );
    let api = api_for(&session);

    let mut poller = UnreadPoller::new(api, TICK).with_cancel_token(token);
    assert_eq!(poller.state(), PollState::Idle);

    let mut batches: Vec<Vec<(String, Vec<String>)>> = Vec::new();
    poller
        .run(|groups| {
            batches.push(
                groups
                    .iter()
                    .map(|g| {
                        (
                            g.chat.id().to_string(),
                            g.messages
                                .iter()
                                .filter_map(|m| m.body().map(str::to_string))
                                .collect(),
                        )
                    })
                    .collect(),
            );
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(poller.state(), PollState::Stopped);
    assert_eq!(batches.len(), 2);
    assert_eq!(
        batches[0],
        vec![
            ("1@c.us".to_string(), vec!["a".to_string(), "b".to_string()]),
            ("2@c.us".to_string(), vec!["c".to_string()]),
        ]
    );
    assert_eq!(batches[1], vec![("3@c.us".to_string(), vec!["d".to_string()])]);
    // Two batches, one empty tick, then the tick that raised the cancellation
    assert_eq!(session.calls_to("getUnreadMessages"), 4);
}

#[tokio::test]
async fn test_cancelled_before_start_never_fetches() {
    let session = Arc::new(ScriptedSession::full());
    let api = api_for(&session);

    let mut poller = UnreadPoller::new(api, TICK);
    poller.cancel_token().cancel();

    let mut calls = 0;
    poller
        .run(|_| {
            calls += 1;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(calls, 0);
    assert_eq!(poller.state(), PollState::Stopped);
    assert!(session.calls().is_empty());
}

#[tokio::test]
async fn test_handler_error_ends_the_loop() {
    let session = Arc::new(
        ScriptedSession::full()
            .reply(
                "getUnreadMessages",
                json!([unread_group("1@c.us", "One", vec![text_payload("1", 10, "a")])]),
            )
            .reply(
                "getUnreadMessages",
                json!([unread_group("1@c.us", "One", vec![text_payload("1", 11, "b")])]),
            ),
    );
    let api = api_for(&session);

    let mut poller = UnreadPoller::new(api, TICK);
    let mut calls = 0;
    let result = poller
        .run(|_| {
            calls += 1;
            Err(anyhow!("handler gave up"))
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "handler gave up");
    assert_eq!(calls, 1);
    assert_eq!(poller.state(), PollState::Stopped);
    assert_eq!(session.calls_to("getUnreadMessages"), 1);
}

#[tokio::test]
async fn test_fetch_error_ends_the_loop() {
    let session = Arc::new(ScriptedSession::full().fail("getUnreadMessages", "Store is not ready"));
    let api = api_for(&session);

    let mut poller = UnreadPoller::new(api, TICK);
    let result = poller.run(|_| Ok(())).await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("Store is not ready"));
    assert_eq!(poller.state(), PollState::Stopped);
}

#[tokio::test]
async fn test_stopped_poller_cannot_restart() {
    let session = Arc::new(ScriptedSession::full());
    let api = api_for(&session);

    let mut poller = UnreadPoller::new(api, TICK);
    poller.cancel_token().cancel();
    poller.run(|_| Ok(())).await.unwrap();

    assert!(poller.run(|_| Ok(())).await.is_err());
}

fn revoked_payload(user: &str, t: i64) -> serde_json::Value {
    json!({"sender": format!("{}@c.us", user), "t": t, "type": "revoked"})
}

#[tokio::test]
async fn test_malformed_batch_ends_the_loop_by_default() {
    let session = Arc::new(ScriptedSession::full().reply(
        "getUnreadMessages",
        json!([unread_group("1@c.us", "One", vec![text_payload("1", 10, "a"), revoked_payload("1", 11)])]),
    ));
    let api = api_for(&session);

    let mut poller = UnreadPoller::new(api, TICK);
    let mut delivered = 0;
    let result = poller
        .run(|_| {
            delivered += 1;
            Ok(())
        })
        .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("'body'"), "unexpected error: {}", err);
    assert_eq!(delivered, 0);
    assert_eq!(poller.state(), PollState::Stopped);
}

#[tokio::test]
async fn test_malformed_batch_is_skipped_when_enabled() {
    let token = CancelToken::new();
    let session = Arc::new(
        ScriptedSession::full()
            .reply(
                "getUnreadMessages",
                json!([unread_group("1@c.us", "One", vec![text_payload("1", 10, "a"), revoked_payload("1", 11)])]),
            )
            .reply(
                "getUnreadMessages",
                json!([unread_group("2@c.us", "Two", vec![text_payload("2", 12, "b")])]),
            )
            .cancel_when_drained("getUnreadMessages", token.clone()),
    );
    let api = api_for(&session);

    let mut poller = UnreadPoller::new(api, TICK)
        .with_cancel_token(token)
        .skip_malformed_batches(true);
    let mut bodies = Vec::new();
    poller
        .run(|groups| {
            for group in &groups {
                bodies.extend(group.messages.iter().filter_map(|m| m.body().map(str::to_string)));
            }
            Ok(())
        })
        .await
        .unwrap();

    // The broken batch is dropped whole; the next one still arrives
    assert_eq!(bodies, vec!["b".to_string()]);
    assert_eq!(session.calls_to("getUnreadMessages"), 3);
    assert_eq!(poller.state(), PollState::Stopped);
}

#[tokio::test]
async fn test_skipping_does_not_hide_page_errors() {
    let session = Arc::new(ScriptedSession::full().fail("getUnreadMessages", "Store is not ready"));
    let api = api_for(&session);

    let mut poller = UnreadPoller::new(api, TICK).skip_malformed_batches(true);
    assert!(poller.run(|_| Ok(())).await.is_err());
}

#[tokio::test]
async fn test_cancel_cuts_the_pause_short() {
    let session = Arc::new(ScriptedSession::full().reply("getUnreadMessages", json!([])));
    let api = api_for(&session);

    let mut poller = UnreadPoller::new(api, Duration::from_secs(60));
    let token = poller.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    tokio::time::timeout(Duration::from_secs(2), poller.run(|_| Ok(())))
        .await
        .expect("poller should stop well before the interval ends")
        .unwrap();

    assert_eq!(session.calls_to("getUnreadMessages"), 1);
    assert_eq!(poller.state(), PollState::Stopped);
}
