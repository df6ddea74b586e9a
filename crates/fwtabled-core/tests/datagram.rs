//! End-to-end tests over UDP and Unix datagram sockets.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use fwtabled_core::{Message, TableEntry};
use fwtabled_test_utils::{
    CallOutcome, RecordedCall, RecordingTables, TableCall, TestConfigBuilder, TestDaemon,
    eventually,
};
use pretty_assertions::assert_eq;

const ADDR: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 7);
const WAIT: Duration = Duration::from_secs(2);

fn call(call: TableCall, outcome: CallOutcome) -> RecordedCall {
    RecordedCall { call, outcome }
}

#[test_log::test(tokio::test)]
async fn test_added_entry_expires_after_ttl() {
    let tables = RecordingTables::new(128);
    let daemon = TestDaemon::start(TestConfigBuilder::new().expire("0:5").build(), tables.clone()).await;
    let entry = TableEntry::new(0, ADDR, 32);

    let sent_at = Instant::now();
    daemon.client().send(&Message::add(0, ADDR, 32)).await.unwrap();
    assert!(eventually(WAIT, || tables.contains(&entry)).await);

    assert!(eventually(Duration::from_secs(10), || !tables.contains(&entry)).await);
    assert!(sent_at.elapsed() >= Duration::from_secs(5));

    let daemon = daemon.stop().await;
    assert!(daemon.expiry().is_empty());
    assert_eq!(
        tables.calls(),
        vec![
            call(TableCall::Add(entry), CallOutcome::Ok),
            call(TableCall::Delete(entry), CallOutcome::Ok),
        ]
    );
}

#[test_log::test(tokio::test)]
async fn test_busy_sockets_do_not_hold_back_expiry() {
    let tables = RecordingTables::new(128);
    // Traffic every 10ms keeps every wait shorter than the 250ms minimum
    // interval, so only the 300ms watchdog can trigger cleanup.
    let config = TestConfigBuilder::new()
        .expire("0:1")
        .cleanup_interval_ms(250, 300)
        .build();
    let daemon = TestDaemon::start(config, tables.clone()).await;
    let entry = TableEntry::new(0, ADDR, 32);
    let client = daemon.client();

    let sent_at = Instant::now();
    client.send(&Message::add(0, ADDR, 32)).await.unwrap();
    assert!(eventually(WAIT, || tables.contains(&entry)).await);

    let noise = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(10));
        loop {
            ticker.tick().await;
            let _ = client.send_raw(&[0xff, 0, 0]).await;
        }
    });

    assert!(eventually(Duration::from_secs(3), || !tables.contains(&entry)).await);
    let elapsed = sent_at.elapsed();
    noise.abort();

    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(2_300), "expired after {elapsed:?}");
    assert_eq!(
        tables.calls(),
        vec![
            call(TableCall::Add(entry), CallOutcome::Ok),
            call(TableCall::Delete(entry), CallOutcome::Ok),
        ]
    );
    daemon.stop().await;
}

#[test_log::test(tokio::test)]
async fn test_repeated_add_deletes_and_retries() {
    let tables = RecordingTables::new(128);
    let daemon = TestDaemon::start(TestConfigBuilder::new().build(), tables.clone()).await;
    let client = daemon.client();
    let entry = TableEntry::new(0, ADDR, 32);

    client.send(&Message::add(0, ADDR, 32)).await.unwrap();
    client.send(&Message::add(0, ADDR, 32)).await.unwrap();
    assert!(eventually(WAIT, || tables.calls().len() == 4).await);

    assert_eq!(
        tables.calls()[1..].to_vec(),
        vec![
            call(TableCall::Add(entry), CallOutcome::AlreadyExists),
            call(TableCall::Delete(entry), CallOutcome::Ok),
            call(TableCall::Add(entry), CallOutcome::Ok),
        ]
    );
    assert_eq!(tables.entries(0), vec![entry]);
    daemon.stop().await;
}

#[test_log::test(tokio::test)]
async fn test_malformed_records_are_dropped() {
    let tables = RecordingTables::new(128);
    let daemon = TestDaemon::start(TestConfigBuilder::new().build(), tables.clone()).await;
    let client = daemon.client();

    client.send_raw(&[0, 203, 0]).await.unwrap();
    client.send_raw(&[0, 203, 0, 113, 7, 32, 1, 0]).await.unwrap();
    client.send_raw(&[0, 203, 0, 113, 7, 32, 9]).await.unwrap();
    client.send_raw(&[0, 203, 0, 113, 7, 33, 1]).await.unwrap();

    let entry = TableEntry::new(1, ADDR, 32);
    client.send(&Message::add(1, ADDR, 32)).await.unwrap();
    assert!(eventually(WAIT, || tables.contains(&entry)).await);

    assert!(!daemon.is_finished());
    assert_eq!(tables.calls(), vec![call(TableCall::Add(entry), CallOutcome::Ok)]);
    daemon.stop().await;
}

#[test_log::test(tokio::test)]
async fn test_table_out_of_range_never_reaches_backend() {
    let tables = RecordingTables::new(8);
    let daemon = TestDaemon::start(TestConfigBuilder::new().build(), tables.clone()).await;
    let client = daemon.client();

    client.send(&Message::add(8, ADDR, 32)).await.unwrap();
    client.send(&Message::delete(9, ADDR, 32)).await.unwrap();
    client.send(&Message::flush(200)).await.unwrap();

    let entry = TableEntry::new(7, ADDR, 32);
    client.send(&Message::add(7, ADDR, 32)).await.unwrap();
    assert!(eventually(WAIT, || tables.contains(&entry)).await);

    assert_eq!(tables.calls(), vec![call(TableCall::Add(entry), CallOutcome::Ok)]);
    daemon.stop().await;
}

#[test_log::test(tokio::test)]
async fn test_zero_prefix_is_host_entry() {
    let tables = RecordingTables::new(128);
    let daemon = TestDaemon::start(TestConfigBuilder::new().build(), tables.clone()).await;
    let client = daemon.client();
    let host = TableEntry::new(2, ADDR, 32);

    client.send_raw(&[2, 203, 0, 113, 7, 0, 1]).await.unwrap();
    assert!(eventually(WAIT, || tables.contains(&host)).await);

    client.send_raw(&[2, 203, 0, 113, 7, 0, 2]).await.unwrap();
    assert!(eventually(WAIT, || !tables.contains(&host)).await);

    assert_eq!(
        tables.calls(),
        vec![
            call(TableCall::Add(host), CallOutcome::Ok),
            call(TableCall::Delete(host), CallOutcome::Ok),
        ]
    );
    daemon.stop().await;
}

#[test_log::test(tokio::test)]
async fn test_flush_empties_table_and_keeps_queue() {
    let tables = RecordingTables::new(128);
    let config = TestConfigBuilder::new().expire(":3600").build();
    let daemon = TestDaemon::start(config, tables.clone()).await;
    let client = daemon.client();

    client.send(&Message::add(4, ADDR, 32)).await.unwrap();
    client.send(&Message::add(4, Ipv4Addr::new(198, 51, 100, 0), 24)).await.unwrap();
    assert!(eventually(WAIT, || tables.entries(4).len() == 2).await);

    client.send(&Message::flush(4)).await.unwrap();
    assert!(eventually(WAIT, || tables.entries(4).is_empty()).await);

    let daemon = daemon.stop().await;
    assert_eq!(daemon.expiry().len(), 2);
}

#[test_log::test(tokio::test)]
async fn test_entries_without_policy_never_expire() {
    let tables = RecordingTables::new(128);
    let config = TestConfigBuilder::new().expire("1:1").build();
    let daemon = TestDaemon::start(config, tables.clone()).await;
    let entry = TableEntry::new(0, ADDR, 32);

    daemon.client().send(&Message::add(0, ADDR, 32)).await.unwrap();
    assert!(eventually(WAIT, || tables.contains(&entry)).await);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(tables.contains(&entry));
    let daemon = daemon.stop().await;
    assert!(daemon.expiry().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_unix_datagram_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fwtabled.sock");
    let tables = RecordingTables::new(128);
    let config = TestConfigBuilder::new().bind(path.to_str().unwrap()).build();
    let daemon = TestDaemon::start(config, tables.clone()).await;

    let entry = TableEntry::new(3, ADDR, 32);
    daemon.client().send(&Message::add(3, ADDR, 32)).await.unwrap();
    assert!(eventually(WAIT, || tables.contains(&entry)).await);

    daemon.stop().await;
}
