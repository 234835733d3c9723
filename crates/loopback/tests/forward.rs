//! End-to-end dials through the loopback transport.

use std::sync::Arc;
use std::time::Duration;

use dialer::{DialError, Dialer, DialerConfig, LogicalAddress, MonitorOutcome};
use loopback::{Echo, LoopbackTransport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

fn address(s: &str) -> LogicalAddress {
    s.parse().unwrap()
}

fn dialer(transport: LoopbackTransport) -> Arc<Dialer> {
    Arc::new(Dialer::new(Arc::new(transport), DialerConfig::default()))
}

#[tokio::test]
async fn echo_round_trip_through_the_dial_hook() {
    let target = address("default.echo-0:7");
    let dialer = dialer(LoopbackTransport::builder().serve(&target, Echo).build());
    let hook = dialer.hook();

    let mut conn = hook(CancellationToken::new(), target.to_string())
        .await
        .unwrap();
    conn.write_all(b"hello, target").await.unwrap();
    let mut buf = vec![0u8; 13];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, b"hello, target");

    let monitor = conn.take_error_monitor().unwrap();
    conn.close().await.unwrap();
    conn.close().await.unwrap();
    let outcome = monitor.join().await.unwrap();
    assert!(
        matches!(outcome, MonitorOutcome::Clean | MonitorOutcome::Stopped),
        "{outcome:?}"
    );
}

#[tokio::test]
async fn split_halves_read_and_write_concurrently() {
    let target = address("default.echo-0:7");
    let dialer = dialer(LoopbackTransport::builder().serve(&target, Echo).build());
    let conn = dialer
        .dial(&CancellationToken::new(), &target.to_string())
        .await
        .unwrap();

    let (mut reader, mut writer) = tokio::io::split(conn);
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let write = tokio::spawn(async move {
        writer.write_all(&payload).await.unwrap();
        writer.shutdown().await.unwrap();
    });
    let mut echoed = Vec::new();
    reader.read_to_end(&mut echoed).await.unwrap();
    write.await.unwrap();

    assert_eq!(echoed, expected);
}

#[tokio::test]
async fn unknown_target_fails_the_upgrade() {
    let dialer = dialer(LoopbackTransport::builder().build());

    let err = dialer
        .dial(&CancellationToken::new(), "default.ghost:80")
        .await
        .unwrap_err();

    match err {
        DialError::UpgradeFailed { endpoint, source } => {
            assert_eq!(endpoint, "default/ghost");
            assert!(source.to_string().contains("404"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unserved_port_is_reported_by_the_monitor() {
    let target = address("default.idle-0:6380");
    let dialer = dialer(LoopbackTransport::builder().target(&target).build());

    let mut conn = dialer
        .dial(&CancellationToken::new(), &target.to_string())
        .await
        .expect("the remote reports port failures after the dial");

    let monitor = conn.take_error_monitor().unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(2), monitor.join())
        .await
        .unwrap();
    match outcome {
        Some(MonitorOutcome::RemoteError(message)) => assert!(message.contains("6380")),
        other => panic!("unexpected monitor outcome: {other:?}"),
    }

    let mut rest = Vec::new();
    assert_eq!(conn.read_to_end(&mut rest).await.unwrap(), 0);
    conn.close().await.unwrap();
}

#[tokio::test]
async fn shutdown_joins_monitors_of_open_connections() {
    let target = address("default.echo-0:7");
    let dialer = dialer(LoopbackTransport::builder().serve(&target, Echo).build());

    let mut conns = Vec::new();
    for _ in 0..3 {
        conns.push(
            dialer
                .dial(&CancellationToken::new(), &target.to_string())
                .await
                .unwrap(),
        );
    }

    tokio::time::timeout(Duration::from_secs(2), dialer.shutdown())
        .await
        .unwrap();
    assert_eq!(dialer.active_monitors(), 0);

    for conn in &mut conns {
        conn.write_all(b"x").await.unwrap();
        let mut b = [0u8; 1];
        conn.read_exact(&mut b).await.unwrap();
        conn.close().await.unwrap();
    }
}
