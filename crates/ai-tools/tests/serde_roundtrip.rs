#![cfg(feature = "serde")]

use ai_tools::{TraceEvent, TraceLog};

#[test]
fn trace_log_json_roundtrip() {
    let log = TraceLog {
        events: vec![
            TraceEvent::new(1, "channel.start").with_subject("main"),
            TraceEvent::new(2, "goap.plan.call").with_detail("goal=stay_fed"),
            TraceEvent::new(3, "deadlock").with_subject("a,b"),
        ],
    };

    let json = serde_json::to_string(&log).expect("serialize");
    let roundtrip: TraceLog = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(roundtrip, log);
}
