#![no_main]

use aeroduel_mobile_sim::protocol::InboundEvent;
use libfuzzer_sys::fuzz_target;

fn notice(event: &InboundEvent) -> Option<(&str, Option<&str>)> {
    match event {
        InboundEvent::PlaneKicked(notice)
        | InboundEvent::PlaneDisqualified(notice)
        | InboundEvent::PlanePowerOn(notice) => {
            Some((notice.plane_id.as_str(), notice.reason.as_deref()))
        }
        _ => None,
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    // Every frame either decodes or reports itself as malformed.
    match InboundEvent::parse(raw) {
        Ok(event) => {
            let _ = event.is_broadcast();
            // Opaque payloads may hold floats that do not re-encode exactly,
            // so only the tag and the plane notice must survive.
            let frame = event.to_frame().to_string();
            let reparsed = InboundEvent::parse(&frame).expect("re-encoded frame must parse");
            assert_eq!(reparsed.tag(), event.tag());
            assert_eq!(notice(&reparsed), notice(&event));
        }
        Err(err) => assert_eq!(err.raw, raw),
    }

    // The generic JSON path should never panic either.
    let _ = serde_json::from_slice::<serde_json::Value>(data);
});
