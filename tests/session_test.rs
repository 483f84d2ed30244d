mod common;

use std::time::Duration;

use common::{kline_message, session_settings, Harness, SYMBOL};
use futuresbot::error::{SessionError, SetupError};
use futuresbot::models::{ExitReason, PositionSide, Signal};
use futuresbot::session::{SessionState, StreamPhase};

const HOLDING: SessionState = SessionState::Streaming(StreamPhase::Holding);
const SEEKING: SessionState = SessionState::Streaming(StreamPhase::Seeking);

#[tokio::test]
async fn test_start_seeds_window_and_streams() {
    let h = Harness::new(&[]);

    let status = h.session.start().await.unwrap();

    assert_eq!(status.state, SEEKING);
    assert!(status.running);
    assert_eq!(
        h.gateway.calls(),
        vec![
            format!("precision {}", SYMBOL),
            format!("leverage {} 10", SYMBOL),
            format!("history {} 5m 30", SYMBOL),
            format!("subscribe {} 5m", SYMBOL),
        ]
    );

    h.session.stop().await;
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let h = Harness::new(&[]);
    h.session.start().await.unwrap();

    let err = h.session.start().await.unwrap_err();
    assert!(matches!(err, SessionError::AlreadyRunning(s) if s == SYMBOL));

    h.session.stop().await;
}

#[tokio::test]
async fn test_long_signal_places_bracket() {
    let mut h = Harness::new(&[Signal::Long]);
    h.gateway.with(|s| s.position_amount = 2.0);
    h.session.start().await.unwrap();

    let status = h.tick(100.0).await;

    assert_eq!(status.state, HOLDING);
    assert!(status.holding_position);
    assert_eq!(status.last_signal, Some(Signal::Long));
    let position = status.position.unwrap();
    assert_eq!(position.side, PositionSide::Long);
    assert_eq!(position.quantity, 2.0);
    assert_eq!(position.take_profit, Some(100.6));
    assert_eq!(position.stop_loss, Some(99.4));

    assert_eq!(h.gateway.count("market BUY 2"), 1);
    assert_eq!(h.gateway.count("TAKE_PROFIT_MARKET SELL 100.6"), 1);
    assert_eq!(h.gateway.count("STOP_MARKET SELL 99.4"), 1);
    assert_eq!(h.gateway.count("cancel_all"), 0);

    h.session.stop().await;
}

#[tokio::test]
async fn test_short_signal_uses_candle_close_without_ticker() {
    let mut h = Harness::new(&[Signal::Short]);
    h.gateway.with(|s| {
        s.market_price = None;
        s.position_amount = -2.0;
    });
    h.session.start().await.unwrap();

    let status = h.tick(100.0).await;

    let position = status.position.unwrap();
    assert_eq!(position.side, PositionSide::Short);
    assert_eq!(position.take_profit, Some(99.4));
    assert_eq!(position.stop_loss, Some(100.6));
    assert_eq!(h.gateway.count("market SELL 2"), 1);

    h.session.stop().await;
}

#[tokio::test]
async fn test_exchange_close_returns_to_seeking_in_same_tick() {
    let mut h = Harness::new(&[Signal::Long]);
    h.gateway.with(|s| s.position_amount = 2.0);
    h.session.start().await.unwrap();

    assert_eq!(h.tick(100.0).await.state, HOLDING);
    assert_eq!(h.tick(100.05).await.state, HOLDING);

    // Static take-profit filled on the exchange
    h.gateway.with(|s| s.position_amount = 0.0);
    let status = h.tick(100.5).await;

    assert_eq!(status.state, SEEKING);
    assert!(!status.holding_position);
    assert!(status.position.is_none());
    assert_eq!(h.gateway.count("cancel_all"), 1);

    let trades = h.journal.trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].exit_reason, ExitReason::BracketFilled);
    assert_eq!(trades[0].exit_price, 100.5);
    assert!((trades[0].pnl - 1.0).abs() < 1e-9);

    // No new signal evaluated on the tick that started out holding
    assert_eq!(h.strategy.evaluations(), 1);

    h.tick(100.4).await;
    assert_eq!(h.strategy.evaluations(), 2);

    h.session.stop().await;
}

#[tokio::test]
async fn test_failed_position_query_keeps_holding() {
    let mut h = Harness::new(&[Signal::Long]);
    h.gateway.with(|s| s.position_amount = 2.0);
    h.session.start().await.unwrap();
    h.tick(100.0).await;

    h.gateway.with(|s| {
        s.position_amount = 0.0;
        s.position_replies.push_back(None);
    });
    let status = h.tick(100.1).await;
    assert_eq!(status.state, HOLDING);
    assert!(status.status_message.contains("check failed"));

    let status = h.tick(100.1).await;
    assert_eq!(status.state, SEEKING);

    h.session.stop().await;
}

#[tokio::test]
async fn test_trailing_stop_locks_profit() {
    let mut h = Harness::new(&[Signal::Long]);
    h.gateway.with(|s| s.position_amount = 2.0);
    h.session.start().await.unwrap();
    h.tick(100.0).await;

    let status = h.tick(100.16).await;
    assert!(status.position.as_ref().unwrap().trailing_active);

    let status = h.tick(102.0).await;
    assert_eq!(status.position.as_ref().unwrap().extreme_price, 102.0);

    // Stop level is 102.0 * 0.999 = 101.898
    let status = h.tick(101.9).await;
    assert_eq!(status.state, HOLDING);

    let status = h.tick(101.8).await;
    assert_eq!(status.state, SEEKING);
    assert_eq!(h.gateway.count("reduce SELL 2"), 1);
    assert_eq!(h.gateway.count("cancel_all"), 1);

    let trades = h.journal.trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].exit_reason, ExitReason::TrailingStop);
    assert_eq!(trades[0].exit_price, 101.8);

    h.session.stop().await;
}

#[tokio::test]
async fn test_failed_trailing_close_retries_next_tick() {
    let mut h = Harness::new(&[Signal::Long]);
    h.gateway.with(|s| s.position_amount = 2.0);
    h.session.start().await.unwrap();
    h.tick(100.0).await;
    h.tick(102.0).await;

    h.gateway.with(|s| s.fail_reduce_only = true);
    let status = h.tick(101.5).await;
    assert_eq!(status.state, HOLDING);
    assert!(h.journal.trades().is_empty());

    h.gateway.with(|s| s.fail_reduce_only = false);
    let status = h.tick(101.4).await;
    assert_eq!(status.state, SEEKING);
    assert_eq!(h.gateway.count("reduce SELL 2"), 2);
    assert_eq!(h.journal.trades().len(), 1);

    h.session.stop().await;
}

#[tokio::test]
async fn test_unbracketed_entry_is_flattened() {
    let mut h = Harness::new(&[Signal::Long]);
    h.gateway.with(|s| {
        s.fail_take_profit = true;
        s.position_amount = 2.0;
    });
    h.session.start().await.unwrap();

    let status = h.tick(100.0).await;

    assert_eq!(status.state, SEEKING);
    assert!(status.last_error.as_deref().unwrap().contains("Unbracketed"));
    // Rollback cancel happens exactly once
    assert_eq!(h.gateway.count("cancel_all"), 1);
    assert_eq!(h.gateway.count("STOP_MARKET"), 0);
    assert_eq!(h.gateway.count("reduce SELL 2"), 1);

    let trades = h.journal.trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].exit_reason, ExitReason::Flattened);

    h.session.stop().await;
}

#[tokio::test]
async fn test_unflattenable_entry_is_adopted() {
    let mut h = Harness::new(&[Signal::Long]);
    h.gateway.with(|s| {
        s.fail_take_profit = true;
        s.fail_reduce_only = true;
        s.position_amount = 2.0;
    });
    h.session.start().await.unwrap();

    let status = h.tick(100.0).await;

    assert_eq!(status.state, HOLDING);
    assert!(status.last_error.as_deref().unwrap().contains("adopted"));
    let position = status.position.unwrap();
    assert_eq!(position.quantity, 2.0);
    assert_eq!(position.take_profit, None);

    h.session.stop().await;
}

#[tokio::test]
async fn test_unverified_exposure_pauses_signals() {
    let mut h = Harness::new(&[Signal::Long, Signal::None]);
    h.gateway.with(|s| {
        s.fail_take_profit = true;
        s.position_replies.extend([None, None]);
    });
    h.session.start().await.unwrap();

    let status = h.tick(100.0).await;
    assert!(status.status_message.contains("unverified"));
    assert_eq!(h.strategy.evaluations(), 1);

    let status = h.tick(100.0).await;
    assert!(status.status_message.contains("signals paused"));
    assert_eq!(h.strategy.evaluations(), 1);

    // Query recovers and reports no exposure
    let status = h.tick(100.0).await;
    assert_eq!(status.state, SEEKING);
    assert_eq!(h.strategy.evaluations(), 2);

    h.session.stop().await;
}

#[tokio::test]
async fn test_noise_frames_are_skipped() {
    let mut h = Harness::new(&[]);
    h.session.start().await.unwrap();

    h.send_raw("not json".to_string());
    h.send_raw(r#"{"result":null,"id":1}"#.to_string());
    let index = h.next_index();
    h.send_raw(kline_message("ETHUSDT", index, 2000.0, true));
    h.send_raw(kline_message(SYMBOL, index, 100.2, false));
    // Not newer than the last history candle
    h.send_raw(kline_message(SYMBOL, 0, 100.2, true));

    let status = h.tick(100.3).await;

    assert_eq!(status.state, SEEKING);
    assert_eq!(h.strategy.evaluations(), 1);
    assert!(status.status_message.contains("100.3"));

    h.session.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent_and_releases_once() {
    let h = Harness::new(&[]);
    h.session.start().await.unwrap();

    let (first, second) = tokio::join!(h.session.stop(), h.session.stop());
    let third = h.session.stop().await;

    for status in [&first, &third] {
        assert_eq!(status.state, SessionState::Idle);
        assert!(!status.running);
    }
    assert!(matches!(
        second.state,
        SessionState::Idle | SessionState::Stopping
    ));
    assert_eq!(h.gateway.with(|s| s.close_calls), 1);
}

#[tokio::test]
async fn test_stop_while_holding_clears_position() {
    let mut h = Harness::new(&[Signal::Long]);
    h.gateway.with(|s| s.position_amount = 2.0);
    h.session.start().await.unwrap();
    h.tick(100.0).await;

    let status = h.session.stop().await;

    assert_eq!(status.state, SessionState::Idle);
    assert!(!status.holding_position);
    assert!(status.position.is_none());
    // Bracket orders are left resting on the exchange
    assert_eq!(h.gateway.count("cancel_all"), 0);
}

#[tokio::test]
async fn test_setup_failure_releases_gateway() {
    let h = Harness::new(&[]);
    h.gateway.with(|s| s.fail_precision = true);

    let err = h.session.start().await.unwrap_err();

    assert!(matches!(err, SessionError::Setup(SetupError::Precision(_))));
    let status = h.session.status();
    assert_eq!(status.state, SessionState::Idle);
    assert!(status.last_error.is_some());
    assert_eq!(h.gateway.with(|s| s.close_calls), 1);
    assert_eq!(h.gateway.count("leverage"), 0);
}

#[tokio::test]
async fn test_empty_history_fails_start() {
    let h = Harness::new(&[]);
    h.gateway.with(|s| s.history.clear());

    let err = h.session.start().await.unwrap_err();

    assert!(matches!(err, SessionError::Setup(SetupError::EmptyHistory)));
    assert_eq!(h.gateway.count("subscribe"), 0);
    assert_eq!(h.session.status().state, SessionState::Idle);
}

#[tokio::test]
async fn test_idle_timeout_ends_session() {
    let mut settings = session_settings();
    settings.stream.idle_timeout_secs = 1;
    let mut h = Harness::with_settings(&[], settings);
    h.session.start().await.unwrap();

    let status = h.wait_until(|s| s.state == SessionState::Idle).await;

    assert!(status.status_message.contains("No message received"));
    assert!(status.last_error.is_some());
    assert_eq!(h.gateway.with(|s| s.close_calls), 1);
}

#[tokio::test]
async fn test_remote_close_ends_session_and_allows_restart() {
    let mut h = Harness::new(&[]);
    h.session.start().await.unwrap();

    h.feed = None;
    let status = h.wait_until(|s| s.state == SessionState::Idle).await;
    assert!(status.status_message.contains("closed"));
    assert_eq!(h.gateway.with(|s| s.close_calls), 1);

    // The fake only hands out one stream, so a restart fails at subscribe
    let err = h.session.start().await.unwrap_err();
    assert!(matches!(err, SessionError::Setup(SetupError::Stream(_))));
    assert_eq!(h.gateway.with(|s| s.close_calls), 2);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.session.status().state, SessionState::Idle);
}
