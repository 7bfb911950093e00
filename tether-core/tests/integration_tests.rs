use tether_core::*;

#[test]
fn test_nsid_wire_conversion() {
    // Assigned ids, including zero
    assert_eq!(NsId::from_wire(0).unwrap().map(NsId::as_raw), Some(0));
    assert_eq!(NsId::from_wire(42).unwrap().map(NsId::as_raw), Some(42));

    // Negative values mean "not assigned"
    assert_eq!(NsId::from_wire(-1).unwrap(), None);
    assert_eq!(NsId::from_wire(i32::MIN).unwrap(), None);

    // Encoding
    assert_eq!(NsId::to_wire(None), NsId::NOT_ASSIGNED);
    assert_eq!(NsId::to_wire(Some(NsId::MAX)), i32::MAX);
}

#[test]
fn test_nsid_display() {
    let id = NsId::new(17).unwrap();
    assert_eq!(format!("{}", id), "17");
}

#[test]
fn test_cookie_display_and_order() {
    let cookies = CookieAllocator::default();
    let first = cookies.next();
    let second = cookies.next();

    assert_eq!(format!("{}", first), "ns#1");
    assert!(first < second);
}

#[test]
fn test_slot_id_index() {
    let slot = SlotId::from_raw(3);
    assert_eq!(slot.index(), 3);
    assert_eq!(format!("{}", slot), "slot3");
}

#[test]
fn test_slot_id_serialization() {
    let slot = SlotId::from_raw(9);
    let json = serde_json::to_string(&slot).unwrap();
    assert_eq!(json, "9");

    let deserialized: SlotId = serde_json::from_str(&json).unwrap();
    assert_eq!(slot, deserialized);
}

#[test]
fn test_error_shorthands() {
    assert!(matches!(Error::not_found("peer"), Error::NotFound { .. }));
    assert!(matches!(
        Error::already_exists("peer"),
        Error::AlreadyExists { .. }
    ));
    assert!(matches!(Error::no_space("ids"), Error::NoSpace { .. }));
    assert!(matches!(
        Error::invalid("bad"),
        Error::InvalidArgument { .. }
    ));
    assert!(matches!(
        Error::denied("dump"),
        Error::PermissionDenied { .. }
    ));
}

#[test]
fn test_event_serialization_roundtrip() {
    let event = NsidEvent::Deleted {
        owner: Cookie::from_raw(10),
        peer: Cookie::from_raw(11),
        nsid: NsId::new(2).unwrap(),
    };

    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("\"type\":\"deleted\""));

    let back: NsidEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back.owner(), Cookie::from_raw(10));
}

#[test]
fn test_process_id() {
    let pid = ProcessId::from_raw(1234);
    assert_eq!(pid.as_raw(), 1234);

    let current = ProcessId::current();
    assert!(current.as_raw() > 0);
}
