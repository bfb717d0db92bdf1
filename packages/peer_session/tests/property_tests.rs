use std::sync::Arc;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use peer_session::{
    ChatLog, ChatPayload, Color, MemoryHub, PeerId, Point, ProtocolMessage, Raster,
    SessionConfig, SessionCoordinator, SimulatedMedia, StrokeEvent,
};

const SIZE: u32 = 32;

// --- Strategies ---

fn arb_point() -> impl Strategy<Value = Point> {
    (-8.0f32..40.0, -8.0f32..40.0).prop_map(|(x, y)| Point::new(x, y))
}

fn arb_color() -> impl Strategy<Value = Color> {
    any::<(u8, u8, u8)>().prop_map(|(r, g, b)| Color::rgb(r, g, b))
}

fn arb_stroke() -> impl Strategy<Value = StrokeEvent> {
    prop_oneof![
        6 => (arb_point(), arb_point(), arb_color(), 0.5f32..20.0).prop_map(
            |(from, to, color, line_width)| StrokeEvent::Draw { from, to, color, line_width }
        ),
        3 => (arb_point(), arb_point(), 0.5f32..20.0).prop_map(
            |(from, to, line_width)| StrokeEvent::Erase { from, to, line_width }
        ),
        1 => Just(StrokeEvent::Clear),
    ]
}

// --- Whiteboard ---

proptest! {
    #[test]
    fn same_events_give_identical_rasters(events in prop::collection::vec(arb_stroke(), 0..24)) {
        let mut a = Raster::new(SIZE, SIZE);
        let mut b = Raster::new(SIZE, SIZE);
        for event in &events {
            a.apply(event).unwrap();
        }
        // The second raster sees the events after a wire round trip.
        for event in &events {
            let bytes = ProtocolMessage::Stroke(event.clone()).encode().unwrap();
            let Some(ProtocolMessage::Stroke(decoded)) = ProtocolMessage::decode(&bytes).unwrap() else {
                panic!("stroke did not survive the wire");
            };
            b.apply(&decoded).unwrap();
        }
        prop_assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn clear_always_yields_an_empty_raster(events in prop::collection::vec(arb_stroke(), 0..24)) {
        let mut r = Raster::new(SIZE, SIZE);
        for event in &events {
            r.apply(event).unwrap();
        }
        r.apply(&StrokeEvent::Clear).unwrap();
        prop_assert_eq!(r, Raster::new(SIZE, SIZE));
    }

    #[test]
    fn erase_never_adds_alpha(events in prop::collection::vec(arb_stroke(), 0..16), from in arb_point(), to in arb_point(), width in 0.5f32..20.0) {
        let mut r = Raster::new(SIZE, SIZE);
        for event in &events {
            r.apply(event).unwrap();
        }
        let before = r.clone();
        r.apply(&StrokeEvent::Erase { from, to, line_width: width }).unwrap();
        for (after, before) in r.as_bytes().chunks(4).zip(before.as_bytes().chunks(4)) {
            prop_assert!(after[3] <= before[3]);
        }
    }
}

// --- Chat ---

proptest! {
    #[test]
    fn chat_ids_never_decrease(offsets in prop::collection::vec(-5_000i64..5_000, 1..32)) {
        let mut log = ChatLog::new();
        let base = 1_700_000_000_000i64;
        let mut last = i64::MIN;
        for offset in offsets {
            let now = Utc.timestamp_millis_opt(base + offset).unwrap();
            let msg = log.compose("x", "me", now).unwrap();
            prop_assert!(msg.id >= last);
            last = msg.id;
        }
    }
}

// --- Coordinator ---

fn arb_message() -> impl Strategy<Value = ProtocolMessage> {
    prop_oneof![
        "[a-z ]{1,16}".prop_map(|text| ProtocolMessage::Chat(ChatPayload {
            id: 1,
            text,
            sender: "bob".into(),
            timestamp: Utc::now(),
        })),
        arb_stroke().prop_map(ProtocolMessage::Stroke),
    ]
}

proptest! {
    #[test]
    fn dispatch_without_connected_session_is_a_noop(
        messages in prop::collection::vec(arb_message(), 1..16),
        attempt_connect in any::<bool>(),
    ) {
        let hub = MemoryHub::new();
        let (transport, _events) = hub.endpoint("alice").unwrap();
        let media = Arc::new(SimulatedMedia::new("alice"));
        let config = SessionConfig { canvas_width: SIZE, canvas_height: SIZE, ..Default::default() };
        let mut coord = SessionCoordinator::new(&config, transport, media);
        if attempt_connect {
            // Connecting, never opened.
            let _ = coord.connect_to(PeerId::from("nobody"));
        }

        for message in messages {
            prop_assert!(!coord.dispatch(message));
        }
        prop_assert!(coord.chat().is_empty());
        prop_assert!(coord.whiteboard().raster().is_blank());
    }
}
