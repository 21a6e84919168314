// Vsync integration tests for fbhwc
//
// Covers callback registration, the synthetic fallback when the kernel
// timestamp file is missing, and enable/disable gating through the composer.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fbhwc::convert::LoggingConverter;
use fbhwc::fb::headless::{FbCall, HeadlessOpener};
use fbhwc::{DisplayId, HwComposer, HwcConfig, HwcEvent, HwcProcs};
use parking_lot::Mutex;

const FB0: &str = "/dev/graphics/fb0";

#[derive(Default)]
struct Collector {
    ticks: Mutex<Vec<i64>>,
}

impl Collector {
    fn count(&self) -> usize {
        self.ticks.lock().len()
    }
}

impl HwcProcs for Collector {
    fn vsync(&self, display: DisplayId, timestamp: i64) {
        assert_eq!(display, DisplayId::Primary);
        self.ticks.lock().push(timestamp);
    }
}

fn composer(config: HwcConfig) -> (HwComposer, HeadlessOpener) {
    let opener = HeadlessOpener::default();
    let composer = HwComposer::with_backend(
        config,
        Box::new(opener.clone()),
        Box::new(LoggingConverter::new()),
    )
    .unwrap();
    (composer, opener)
}

fn missing_timestamp_config() -> (HwcConfig, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = HwcConfig::default();
    config.devices.vsync_timestamp = dir.path().join("vsync");
    (config, dir)
}

fn vsync_enable_calls(opener: &HeadlessOpener) -> Vec<bool> {
    opener
        .journal()
        .calls_for(FB0)
        .into_iter()
        .filter_map(|call| match call {
            FbCall::SetVsyncEnabled(enabled) => Some(enabled),
            _ => None,
        })
        .collect()
}

#[test]
fn test_enable_is_idempotent() {
    let (mut composer, opener) = composer(HwcConfig::default());

    composer.set_vsync_enabled(DisplayId::Primary, true).unwrap();
    composer.set_vsync_enabled(DisplayId::Primary, true).unwrap();
    assert_eq!(vsync_enable_calls(&opener), vec![true]);

    composer
        .event_control(DisplayId::Primary, HwcEvent::Vsync, false)
        .unwrap();
    composer
        .event_control(DisplayId::Primary, HwcEvent::Vsync, false)
        .unwrap();
    assert_eq!(vsync_enable_calls(&opener), vec![true, false]);
    assert!(!composer.vsync_state().enabled());
}

#[test]
fn test_thread_not_started_before_registration() {
    let (mut composer, _opener) = composer(HwcConfig::default());
    composer.set_vsync_enabled(DisplayId::Primary, true).unwrap();
    assert!(!composer.vsync_running());
    assert!(!composer.vsync_state().is_registered());
}

#[test]
fn test_missing_timestamp_file_falls_back_to_synthetic_ticks() {
    let (config, _dir) = missing_timestamp_config();
    let (mut composer, opener) = composer(config);
    let collector = Arc::new(Collector::default());

    composer.register_procs(collector.clone());
    assert!(composer.vsync_running());
    assert!(composer.vsync_state().fake());

    // Synthetic timing never touches the vsync interrupt
    composer.set_vsync_enabled(DisplayId::Primary, true).unwrap();
    assert!(vsync_enable_calls(&opener).is_empty());

    thread::sleep(Duration::from_millis(250));
    composer.shutdown();

    let ticks = collector.ticks.lock().clone();
    assert!(ticks.len() >= 5, "only {} ticks", ticks.len());
    for pair in ticks.windows(2) {
        let interval = pair[1] - pair[0];
        assert!(interval >= 16_000_000, "interval {}ns", interval);
    }
}

#[test]
fn test_disabled_vsync_suppresses_delivery() {
    let (config, _dir) = missing_timestamp_config();
    let (mut composer, _opener) = composer(config);
    let collector = Arc::new(Collector::default());
    composer.register_procs(collector.clone());

    thread::sleep(Duration::from_millis(100));
    assert_eq!(collector.count(), 0);
    assert!(composer.vsync_running(), "thread keeps running while disabled");

    composer.set_vsync_enabled(DisplayId::Primary, true).unwrap();
    thread::sleep(Duration::from_millis(100));
    composer.set_vsync_enabled(DisplayId::Primary, false).unwrap();

    // Let a tick that was already in flight land
    thread::sleep(Duration::from_millis(40));
    let delivered = collector.count();
    assert!(delivered > 0);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(collector.count(), delivered);
}

#[test]
fn test_reregistration_keeps_single_thread() {
    let (config, _dir) = missing_timestamp_config();
    let (mut composer, _opener) = composer(config);
    let first = Arc::new(Collector::default());
    let second = Arc::new(Collector::default());

    composer.register_procs(first.clone());
    composer.register_procs(second.clone());
    composer.set_vsync_enabled(DisplayId::Primary, true).unwrap();

    thread::sleep(Duration::from_millis(100));
    composer.shutdown();

    assert_eq!(first.count(), 0);
    assert!(second.count() > 0);
    assert_eq!(composer.vsync_state().delivered() as usize, second.count());
}

#[test]
fn test_shutdown_is_prompt() {
    let (config, _dir) = missing_timestamp_config();
    let (mut composer, _opener) = composer(config);
    composer.register_procs(Arc::new(Collector::default()));

    let start = Instant::now();
    composer.shutdown();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!composer.vsync_running());
}

#[test]
fn test_dump_reports_vsync_state() {
    let (config, _dir) = missing_timestamp_config();
    let (mut composer, _opener) = composer(config);
    composer.register_procs(Arc::new(Collector::default()));

    let dump = composer.dump();
    assert!(dump.contains("fake true"));
    assert!(dump.contains("thread running"));
}
