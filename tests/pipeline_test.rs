//! Integration tests for the frame-to-database pipeline

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use pms_logger::diagnostics::create_shared_log;
use pms_logger::{
    Database, EnvReading, EnvironmentSensor, Flush, Frame, Logger, LoggerError, Particulates,
    PollEvent,
};
use std::collections::VecDeque;
use std::io::Cursor;
use std::time::Duration;

/// Environmental sensor replaying a fixed script of readings.
struct ScriptedSensor(VecDeque<Option<EnvReading>>);

impl EnvironmentSensor for ScriptedSensor {
    fn read(&mut self) -> Option<EnvReading> {
        self.0.pop_front().flatten()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn frame(pm2_5: u16, counts: u16) -> Frame {
    Frame {
        frame_length: 28,
        particulates: Particulates {
            pm1_0_cf1: pm2_5 / 2,
            pm2_5_cf1: pm2_5,
            pm10_cf1: pm2_5 + 1,
            pm1_0_atm: pm2_5 / 2,
            pm2_5_atm: pm2_5,
            pm10_atm: pm2_5 + 1,
            count_0_3um: counts,
            count_0_5um: counts / 2,
            count_1_0um: counts / 4,
            count_2_5um: 3,
            count_5_0um: 1,
            count_10um: 0,
        },
        version: 0x97,
        error_code: 0,
        checksum: 0,
    }
    .with_valid_checksum()
}

fn start() -> DateTime<Utc> {
    "2024-03-01T12:00:00Z".parse().unwrap()
}

fn at_millis(ms: i64) -> DateTime<Utc> {
    start() + ChronoDuration::milliseconds(ms)
}

#[test]
fn test_windows_are_averaged_and_stored() {
    // Window 1 (closed at 4.9s): three valid frames, one corrupt frame, line noise.
    // Window 2 (closed at 9.8s): two valid frames and no temperature/humidity.
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&frame(10, 900).to_wire());
    bytes.extend_from_slice(&[0x00, 0x42, 0x11]);
    bytes.extend_from_slice(&frame(11, 1000).to_wire());
    let mut corrupt = frame(500, 500).to_wire();
    corrupt[8] ^= 0x01;
    bytes.extend_from_slice(&corrupt);
    bytes.extend_from_slice(&frame(13, 1100).to_wire());
    bytes.extend_from_slice(&frame(20, 2000).to_wire());
    bytes.extend_from_slice(&frame(21, 2001).to_wire());

    let sensor = ScriptedSensor(VecDeque::from(vec![
        Some(EnvReading::new(21.0, 40.0)),
        None,
        Some(EnvReading::new(22.0, 42.0)),
        Some(EnvReading::new(21.5, 44.0)),
        None,
        None,
    ]));

    let diagnostics = create_shared_log();
    let db = Database::open_in_memory("living").unwrap();
    let mut logger = Logger::new(
        Cursor::new(bytes),
        sensor,
        db,
        Duration::from_millis(4900),
        start(),
        diagnostics.clone(),
    );

    let mut events = Vec::new();
    let mut flushes = Vec::new();
    for ms in [0, 100, 200, 4900, 5000, 9800] {
        let cycle = logger.poll_once(at_millis(ms)).unwrap();
        events.push(cycle.event);
        flushes.push(cycle.flush);
    }

    assert!(matches!(events[0], PollEvent::Accepted(_)));
    assert!(matches!(events[1], PollEvent::Accepted(_)));
    assert!(matches!(events[2], PollEvent::Rejected { .. }));
    assert!(events[3..].iter().all(|e| matches!(e, PollEvent::Accepted(_))));
    assert!(matches!(flushes[3], Flush::Complete(_)));

    let completed: Vec<_> = flushes
        .into_iter()
        .filter_map(|f| match f {
            Flush::Complete(result) => Some(result),
            _ => None,
        })
        .collect();
    assert_eq!(completed.len(), 2);

    let first = &completed[0];
    assert_eq!(first.samples, 3);
    assert_eq!(first.particulates.pm2_5_cf1, 11); // (10 + 11 + 13) / 3 = 11.33
    assert_eq!(first.particulates.count_0_3um, 1000);
    // Reading taken alongside the corrupt frame still counts.
    assert_eq!(first.env_samples, 3);
    assert_eq!(first.temperature_c, Some(21.5));
    assert_eq!(first.humidity_percent, Some(42.0));

    let second = &completed[1];
    assert_eq!(second.samples, 2);
    assert_eq!(second.particulates.pm2_5_cf1, 20); // 20.5 ties to even
    assert_eq!(second.temperature_c, None);
    assert_eq!(second.window_start, at_millis(4900));

    let db = logger.into_sink();
    let rows = db.rows().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].particulates.pm2_5_cf1, 11);
    assert_eq!(rows[0].temperature_c, Some(21.5));
    assert_eq!(rows[1].humidity_percent, None);

    let stats = diagnostics.stats();
    assert_eq!(stats.frames_decoded, 5);
    assert_eq!(stats.checksum_failures, 1);
    assert_eq!(stats.sync_bytes_skipped, 3);
    assert_eq!(stats.windows_persisted, 2);
}

#[test]
fn test_silent_sensor_yields_empty_window() {
    let diagnostics = create_shared_log();
    let mut logger = Logger::new(
        Cursor::new(Vec::<u8>::new()),
        ScriptedSensor(VecDeque::new()),
        Database::open_in_memory("living").unwrap(),
        Duration::from_millis(4900),
        start(),
        diagnostics.clone(),
    );

    assert_eq!(logger.poll_once(at_millis(100)).unwrap().flush, Flush::NotDue);
    assert!(matches!(
        logger.poll_once(at_millis(5000)).unwrap().flush,
        Flush::Empty { .. }
    ));

    assert_eq!(logger.sink().count().unwrap(), 0);
    assert_eq!(diagnostics.stats().empty_windows, 1);
}

#[test]
fn test_missing_table_is_fatal() {
    struct Unwritable;

    impl pms_logger::WindowSink for Unwritable {
        type Error = pms_logger::StoreError;

        fn persist(&mut self, _: &pms_logger::WindowResult) -> Result<(), Self::Error> {
            Err(pms_logger::StoreError::Sqlite("no such table: living".to_string()))
        }
    }

    let mut logger = Logger::new(
        Cursor::new(frame(5, 5).to_wire().to_vec()),
        ScriptedSensor(VecDeque::new()),
        Unwritable,
        Duration::from_millis(4900),
        start(),
        create_shared_log(),
    );

    logger.poll_once(at_millis(0)).unwrap();
    match logger.poll_once(at_millis(4900)) {
        Err(LoggerError::Store(e)) => assert!(e.to_string().contains("no such table")),
        other => panic!("expected store error, got {other:?}"),
    }
}
