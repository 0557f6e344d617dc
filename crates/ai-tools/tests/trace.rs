use std::sync::{Arc, Mutex};

use ai_tools::{TraceEvent, TraceLog, TraceSink, Tracer};

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<TraceEvent>>>);

impl TraceSink for SharedSink {
    fn emit(&mut self, event: TraceEvent) {
        self.0.lock().unwrap().push(event);
    }
}

#[test]
fn emit_writes_to_trace_log_when_recording() {
    let mut tracer = Tracer::recording();

    tracer.emit(
        TraceEvent::new(1, "channel.start")
            .with_subject("main")
            .with_detail("flow=start"),
    );

    let log = tracer.log().unwrap();
    assert_eq!(log.events.len(), 1);
    assert_eq!(log.events[0].pass, 1);
    assert_eq!(log.events[0].tag, "channel.start");
    assert_eq!(log.events[0].subject, "main");
    assert_eq!(log.events[0].detail, "flow=start");
}

#[test]
fn emit_writes_to_sink_when_present() {
    let handle = SharedSink::default();
    let shared = handle.0.clone();
    let mut tracer = Tracer::disabled().with_sink(Box::new(handle));

    tracer.emit(TraceEvent::new(2, "sync.emit").with_subject("ready"));

    assert!(tracer.log().is_none());
    let events = shared.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].pass, 2);
    assert_eq!(events[0].tag, "sync.emit");
}

#[test]
fn emit_writes_to_both_log_and_sink_when_both_present() {
    let handle = SharedSink::default();
    let shared = handle.0.clone();
    let mut tracer = Tracer::recording().with_sink(Box::new(handle));

    tracer.emit(TraceEvent::new(3, "both"));

    assert_eq!(tracer.log().unwrap().events[0].tag, "both");
    assert_eq!(shared.lock().unwrap()[0].tag, "both");
}

#[test]
fn take_log_drains_but_keeps_recording() {
    let mut tracer = Tracer::recording();
    tracer.emit(TraceEvent::new(1, "a"));
    tracer.emit(TraceEvent::new(1, "b"));
    tracer.emit(TraceEvent::new(2, "a"));

    let log: TraceLog = tracer.take_log();
    assert_eq!(log.with_tag("a").count(), 2);
    assert!(tracer.log().unwrap().is_empty());

    tracer.emit(TraceEvent::new(3, "c"));
    assert_eq!(tracer.log().unwrap().len(), 1);
}

#[test]
fn display_is_compact() {
    let event = TraceEvent::new(7, "wait.timeout").with_subject("camera");
    assert_eq!(event.to_string(), "[   7] wait.timeout camera");
}
