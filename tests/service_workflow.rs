//! End-to-end workflows against a scripted meter: connect, query, download,
//! delete, time out and disconnect.

mod common;

use chrono::{NaiveDate, NaiveDateTime};
use common::*;
use energymeter_link::{
    ConnectionState, DeletePrompt, Deletion, DeviceId, ErrorKind, FileName, FixedAnswer,
    MeterService, MockConnector, MockSerialPort,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn rtc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, s)
        .unwrap()
}

async fn wait_disconnected(meter: &MeterService) {
    let mut states = meter.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == ConnectionState::Disconnected),
    )
    .await
    .expect("state never became disconnected")
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_first_command_connects_and_refreshes() {
    let port = scripted_meter("MOCK0", &[("230601.log", 120)]);
    let (meter, connector) = service_with(&port);
    assert_eq!(meter.state(), ConnectionState::Disconnected);

    let info = meter.load_info().await.unwrap();
    assert_eq!(info.device_id, 1);
    assert_eq!(info.used_bytes(), 30_720);

    // the connect-time refresh already answered LOAD-INFO
    assert_eq!(port.written_queries(), vec!["$LOAD-INFO", "$LOAD-LIST"]);
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(
        meter.state(),
        ConnectionState::Connected {
            port: "MOCK0".into()
        }
    );
    assert_eq!(meter.cached_files().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_is_reused() {
    let mut port = scripted_meter("MOCK0", &[]);
    port.reply(INFO).reply(&list_frame(&[("a.log", 3)]));
    let (meter, connector) = service_with(&port);

    meter.connect().await.unwrap();
    let files = meter.load_list().await.unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(
        port.written_queries(),
        vec!["$LOAD-INFO", "$LOAD-LIST", "$LOAD-INFO", "$LOAD-LIST"]
    );
    let metrics = meter.session_metrics().await.unwrap();
    assert_eq!(metrics.transactions, 4);
}

#[tokio::test(start_paused = true)]
async fn test_load_list_on_fresh_connect_uses_refresh() {
    let port = scripted_meter("MOCK0", &[("a.log", 10), ("b.log", 20)]);
    let (meter, _) = service_with(&port);

    let files = meter.load_list().await.unwrap();
    assert_eq!(files.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(), ["a.log", "b.log"]);
    assert_eq!(port.written_queries(), vec!["$LOAD-INFO", "$LOAD-LIST"]);
    assert_eq!(port.remaining_replies(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_device_lists_no_files() {
    let mut port = MockSerialPort::new("MOCK0");
    port.reply(INFO).reply(&empty_list_frame());
    let (meter, _) = service_with(&port);

    assert!(meter.load_list().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_set_id_rereads_info() {
    let mut port = scripted_meter("MOCK0", &[]);
    port.reply(OK)
        .reply(&info_frame(42, 100, 40, 512, "23-06-01-12-30-05"));
    let (meter, _) = service_with(&port);

    let info = meter.set_id(DeviceId::new(42).unwrap()).await.unwrap().unwrap();
    assert_eq!(info.device_id, 42);
    assert_eq!(
        port.written_queries(),
        vec!["$LOAD-INFO", "$LOAD-LIST", "$SET-ID 00042", "$LOAD-INFO"]
    );
    assert_eq!(meter.cached_info().unwrap().device_id, 42);
}

#[tokio::test(start_paused = true)]
async fn test_set_rtc_formats_clock() {
    let mut port = scripted_meter("MOCK0", &[]);
    port.reply(OK)
        .reply(&info_frame(1, 100, 40, 512, "24-02-29-23-59-58"));
    let (meter, _) = service_with(&port);

    let info = meter
        .set_rtc(rtc(2024, 2, 29, 23, 59, 58))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.rtc.format("%m-%d %H:%M:%S").to_string(), "02-29 23:59:58");
    assert_eq!(port.written_queries()[2], "$SET-RTC 24-02-29-23-59-58");
}

#[tokio::test(start_paused = true)]
async fn test_device_clock_advances_with_time() {
    let port = scripted_meter("MOCK0", &[]);
    let (meter, _) = service_with(&port);

    let info = meter.load_info().await.unwrap();
    tokio::time::advance(Duration::from_secs(90)).await;

    let clock = meter.device_clock().unwrap();
    assert_eq!(clock, info.rtc + chrono::TimeDelta::seconds(90));
}

#[tokio::test(start_paused = true)]
async fn test_device_error_keeps_session() {
    let mut port = scripted_meter("MOCK0", &[]);
    port.reply(b"$ERROR").reply(INFO);
    let (meter, connector) = service_with(&port);

    let err = meter.set_id(DeviceId::new(7).unwrap()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceError);
    assert_eq!(err.query(), Some("$SET-ID 00007"));
    assert_eq!(err.response(), Some("$ERROR"));

    assert!(meter.state().is_connected());
    meter.load_info().await.unwrap();
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_keeps_session() {
    let mut port = scripted_meter("MOCK0", &[]);
    port.reply_silence().reply(INFO);
    let (meter, connector) = service_with(&port);
    meter.connect().await.unwrap();

    let started = tokio::time::Instant::now();
    let err = meter.load_info().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() >= meter.timeouts().control);
    assert!(meter.state().is_connected());

    // the link survives; the next command goes over the same session
    let info = meter.load_info().await.unwrap();
    assert_eq!(info.device_id, 1);
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_refresh_is_not_fatal() {
    let mut port = MockSerialPort::new("MOCK0");
    port.reply(b"garbage$OK").reply(OK);
    let (meter, _) = service_with(&port);

    // refresh: INFO is malformed so LIST is never sent; DELETE-ALL then gets $OK
    // and its own refresh has nothing scripted
    let outcome = meter.delete_all(&FixedAnswer(true)).await.unwrap();
    assert_eq!(outcome, Deletion::Deleted { remaining: None });
    assert_eq!(
        port.written_queries(),
        vec!["$LOAD-INFO", "$DELETE-ALL", "$LOAD-INFO"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_load_list_reports_refresh_failure() {
    let mut port = MockSerialPort::new("MOCK0");
    port.reply(INFO).reply(b"$FILE-ENTRY 1$OK");
    let (meter, _) = service_with(&port);

    let err = meter.load_list().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    assert_eq!(err.query(), Some("$LOAD-LIST"));
}

#[tokio::test(start_paused = true)]
async fn test_load_all_downloads_every_file() {
    let files: &[(&str, &[u8])] = &[("a.log", b"hello"), ("b.log", b"x$ y")];
    let mut port = scripted_meter("MOCK0", &[("a.log", 5), ("b.log", 4)]);
    port.reply_in_chunks(&bulk_frame(files), 4);
    let (meter, _) = service_with(&port);

    let blobs = meter.load_all().await.unwrap();
    assert_eq!(blobs.len(), 2);
    assert_eq!(blobs[0].content, b"hello");
    assert_eq!(blobs[1].name, "b.log");
    assert_eq!(blobs[1].content, b"x$ y");

    let stats = meter.last_transfer().unwrap();
    assert_eq!(stats.bytes, bulk_frame(files).len() as u64);
}

#[tokio::test(start_paused = true)]
async fn test_load_all_on_empty_device() {
    let mut port = MockSerialPort::new("MOCK0");
    port.reply(INFO).reply(&empty_list_frame()).reply(OK);
    let (meter, _) = service_with(&port);

    assert!(meter.load_all().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_load_one_keeps_payload_sentinels() {
    let content = b"line $OK\nline $FILE-START\n";
    let mut port = scripted_meter("MOCK0", &[("230601.log", content.len() as u32)]);
    port.reply_in_chunks(&single_frame(content), 7);
    let (meter, _) = service_with(&port);

    let name = FileName::new("230601.log").unwrap();
    let blob = meter.load_one(&name).await.unwrap();
    assert_eq!(blob.name, "230601.log");
    assert_eq!(blob.content, content);
    assert_eq!(port.written_queries()[2], "$LOAD-ONE 10 230601.log");
}

#[tokio::test(start_paused = true)]
async fn test_delete_one_refreshes_listing() {
    let mut port = scripted_meter("MOCK0", &[("a.log", 1), ("b.log", 2)]);
    port.reply(OK).reply(INFO).reply(&list_frame(&[("b.log", 2)]));
    let (meter, _) = service_with(&port);

    let name = FileName::new("a.log").unwrap();
    let outcome = meter.delete_one(&name, &FixedAnswer(true)).await.unwrap();
    match outcome {
        Deletion::Deleted { remaining } => {
            let remaining = remaining.expect("listing was re-read");
            assert_eq!(remaining.len(), 1);
            assert_eq!(remaining[0].name, "b.log");
        }
        Deletion::Declined => panic!("deletion was confirmed"),
    }
    assert_eq!(
        port.written_queries(),
        vec![
            "$LOAD-INFO",
            "$LOAD-LIST",
            "$DELETE-ONE 5 a.log",
            "$LOAD-INFO",
            "$LOAD-LIST"
        ]
    );
    assert_eq!(meter.cached_files().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delete_all_leaves_empty_listing() {
    let mut port = scripted_meter("MOCK0", &[("a.log", 1)]);
    port.reply(OK).reply(INFO).reply(&empty_list_frame());
    let (meter, _) = service_with(&port);

    let outcome = meter.delete_all(&FixedAnswer(true)).await.unwrap();
    assert_eq!(
        outcome,
        Deletion::Deleted {
            remaining: Some(vec![])
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_delete_survives_silent_refresh() {
    let mut port = scripted_meter("MOCK0", &[("a.log", 1)]);
    port.reply(OK).reply_silence();
    let (meter, connector) = service_with(&port);

    let name = FileName::new("a.log").unwrap();
    let outcome = meter.delete_one(&name, &FixedAnswer(true)).await.unwrap();
    assert_eq!(outcome, Deletion::Deleted { remaining: None });
    assert_eq!(
        port.written_queries(),
        vec!["$LOAD-INFO", "$LOAD-LIST", "$DELETE-ONE 5 a.log", "$LOAD-INFO"]
    );
    assert!(meter.state().is_connected());
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_set_id_survives_silent_refresh() {
    let mut port = scripted_meter("MOCK0", &[]);
    port.reply(OK).reply_silence();
    let (meter, _) = service_with(&port);

    let info = meter.set_id(DeviceId::new(9).unwrap()).await.unwrap();
    assert_eq!(info, None);
    assert_eq!(
        port.written_queries(),
        vec!["$LOAD-INFO", "$LOAD-LIST", "$SET-ID 00009", "$LOAD-INFO"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_set_rtc_survives_malformed_refresh() {
    let mut port = scripted_meter("MOCK0", &[]);
    port.reply(OK).reply(b"1 100$OK");
    let (meter, _) = service_with(&port);

    let info = meter.set_rtc(rtc(2024, 3, 1, 8, 0, 0)).await.unwrap();
    assert_eq!(info, None);
    assert_eq!(port.written_queries()[2], "$SET-RTC 24-03-01-08-00-00");
}

struct CountingConfirm {
    answer: bool,
    asked: AtomicUsize,
}

#[async_trait::async_trait]
impl energymeter_link::Confirm for CountingConfirm {
    async fn confirm(&self, prompt: &DeletePrompt) -> bool {
        assert_eq!(*prompt, DeletePrompt::All);
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

#[tokio::test(start_paused = true)]
async fn test_declined_delete_never_touches_device() {
    let port = scripted_meter("MOCK0", &[("a.log", 1)]);
    let (meter, connector) = service_with(&port);
    let confirm = CountingConfirm {
        answer: false,
        asked: AtomicUsize::new(0),
    };

    let outcome = meter.delete_all(&confirm).await.unwrap();
    assert_eq!(outcome, Deletion::Declined);
    assert_eq!(confirm.asked.load(Ordering::SeqCst), 1);
    assert_eq!(connector.connect_count(), 0);
    assert!(port.written_queries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_no_device_is_benign() {
    let meter = MeterService::new(MockConnector::new());

    let err = meter.load_info().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceNotFound);
    assert!(err.is_benign());
    assert_eq!(meter.state(), ConnectionState::Disconnected);
    assert!(meter.cached_info().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unplug_while_idle_clears_cache() {
    let port = scripted_meter("MOCK0", &[("a.log", 1)]);
    let second = scripted_meter("MOCK1", &[]);
    let (meter, connector) = service_with(&port);
    connector.push_port(second.clone());

    meter.connect().await.unwrap();
    assert!(meter.cached_info().is_some());

    port.disconnect();
    wait_disconnected(&meter).await;
    assert!(meter.cached_info().is_none());
    assert!(meter.cached_files().is_none());

    // the next command reconnects
    meter.load_info().await.unwrap();
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(
        meter.state(),
        ConnectionState::Connected {
            port: "MOCK1".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_unplug_mid_transfer() {
    let mut port = scripted_meter("MOCK0", &[("a.log", 10)]);
    port.reply_then_disconnect(b"$FILE-ENTRY 10 a.log abc");
    let (meter, connector) = service_with(&port);

    let err = meter.load_all().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReadFailed);
    assert!(err.is_link_loss());

    assert_eq!(meter.state(), ConnectionState::Disconnected);
    assert!(meter.cached_info().is_none());

    // nothing left to connect to
    let err = meter.load_info().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceNotFound);
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_is_idempotent() {
    let port = scripted_meter("MOCK0", &[]);
    let (meter, _) = service_with(&port);

    meter.close().await;
    meter.connect().await.unwrap();
    meter.close().await;
    meter.close().await;

    assert_eq!(meter.state(), ConnectionState::Disconnected);
    assert!(meter.session_metrics().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_commands_do_not_interleave() {
    let mut port = scripted_meter("MOCK0", &[("a.log", 1)]);
    port.reply_in_chunks(&single_frame(b"abcdef"), 2).reply(INFO);
    let (meter, connector) = service_with(&port);
    let other = meter.clone();
    let name = FileName::new("a.log").unwrap();

    // the first command connects; the others queue behind it in call order
    let (info, blob, again) = tokio::join!(
        meter.load_info(),
        meter.load_one(&name),
        other.load_info()
    );

    assert_eq!(info.unwrap().device_id, 1);
    assert_eq!(blob.unwrap().content, b"abcdef");
    assert_eq!(again.unwrap().device_id, 1);
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(port.remaining_replies(), 0);
    assert_eq!(
        port.written_queries(),
        vec!["$LOAD-INFO", "$LOAD-LIST", "$LOAD-ONE 5 a.log", "$LOAD-INFO"]
    );
}
