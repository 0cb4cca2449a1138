//! ---
//! mtc_section: "15-testing-qa-runbook"
//! mtc_subsection: "integration-tests"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Heartbeat negotiation and timeout over loopback TCP."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::Result;
use mtc_common::config::AdapterSettings;
use mtc_net::Adapter;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

fn adapter(heartbeat_ms: u64) -> Adapter {
    let mut settings = AdapterSettings::loopback();
    settings.heartbeat = Duration::from_millis(heartbeat_ms);
    settings.shutdown_grace = Duration::from_millis(500);
    Adapter::new(settings)
}

async fn read_line(reader: &mut BufReader<TcpStream>, wait: Duration) -> Option<String> {
    let mut line = String::new();
    match timeout(wait, reader.read_line(&mut line)).await {
        Ok(Ok(n)) if n > 0 => Some(line),
        _ => None,
    }
}

async fn settle(adapter: &Adapter, expected: usize) -> bool {
    for _ in 0..200 {
        if adapter.client_count() == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn ping_is_answered_with_interval() -> Result<()> {
    let adapter = adapter(200);
    let addr = adapter.start().await?;
    let mut agent = BufReader::new(TcpStream::connect(addr).await?);
    assert!(settle(&adapter, 1).await);

    agent.get_mut().write_all(b"* PING\n").await?;
    assert_eq!(
        read_line(&mut agent, Duration::from_secs(2)).await.as_deref(),
        Some("* PONG 200\n")
    );

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        agent.get_mut().write_all(b"* PING\n").await?;
        assert_eq!(
            read_line(&mut agent, Duration::from_secs(2)).await.as_deref(),
            Some("* PONG 200\n")
        );
    }
    assert_eq!(adapter.client_count(), 1);

    adapter.stop().await;
    Ok(())
}

#[tokio::test]
async fn silent_agent_is_dropped_after_two_intervals() -> Result<()> {
    let adapter = adapter(100);
    let addr = adapter.start().await?;
    let mut agent = BufReader::new(TcpStream::connect(addr).await?);
    assert!(settle(&adapter, 1).await);

    agent.get_mut().write_all(b"* PING\n").await?;
    assert_eq!(
        read_line(&mut agent, Duration::from_secs(2)).await.as_deref(),
        Some("* PONG 100\n")
    );

    assert!(settle(&adapter, 0).await);
    assert_eq!(read_line(&mut agent, Duration::from_secs(2)).await, None);

    adapter.stop().await;
    Ok(())
}

#[tokio::test]
async fn no_timeout_before_the_first_ping() -> Result<()> {
    let adapter = adapter(50);
    let addr = adapter.start().await?;
    let _agent = TcpStream::connect(addr).await?;
    assert!(settle(&adapter, 1).await);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(adapter.client_count(), 1);

    adapter.stop().await;
    Ok(())
}

#[tokio::test]
async fn disabled_heartbeat_never_answers_or_expires() -> Result<()> {
    let adapter = adapter(0);
    let addr = adapter.start().await?;
    let mut agent = BufReader::new(TcpStream::connect(addr).await?);
    assert!(settle(&adapter, 1).await);

    agent.get_mut().write_all(b"* PING\n").await?;
    assert_eq!(read_line(&mut agent, Duration::from_millis(300)).await, None);
    assert_eq!(adapter.client_count(), 1);

    adapter.stop().await;
    Ok(())
}

#[tokio::test]
async fn garbage_lines_are_ignored() -> Result<()> {
    let adapter = adapter(200);
    let addr = adapter.start().await?;
    let mut agent = BufReader::new(TcpStream::connect(addr).await?);
    assert!(settle(&adapter, 1).await);

    agent.get_mut().write_all(b"hello\r\n* PIN").await?;
    agent.get_mut().write_all(b"G\r\n").await?;
    assert_eq!(
        read_line(&mut agent, Duration::from_secs(2)).await.as_deref(),
        Some("* PONG 200\n")
    );

    adapter.stop().await;
    Ok(())
}
