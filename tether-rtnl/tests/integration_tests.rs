use std::sync::Arc;

use tether_core::{NsId, NsidEvent, ProcessId};
use tether_namespace::{ManagerConfig, NamespaceManager, NamespaceRef};
use tether_rtnl::attr::{
    NETNSA_CURRENT_NSID, NETNSA_FD, NETNSA_NSID, NETNSA_PID, NETNSA_TARGET_NSID,
    NLMSGERR_ATTR_BAD_ATTR, NLMSGERR_ATTR_MSG,
};
use tether_rtnl::message::{NLMSG_DONE, NLMSG_ERROR, RTM_DELNSID, RTM_GETNSID, RTM_NEWNSID, flags};
use tether_rtnl::*;
use tether_security::{CapabilitySet, Principal, SecurityManager};

struct Fixture {
    mgr: Arc<NamespaceManager>,
    resolver: StaticResolver,
    service: NsidService,
    root: Arc<Principal>,
}

impl Fixture {
    fn new(config: RtnlConfig) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let mgr = Arc::new(NamespaceManager::start(ManagerConfig::default()).unwrap());
        let resolver = StaticResolver::new();
        let service = NsidService::new(
            Arc::clone(&mgr),
            Arc::new(resolver.clone()),
            Arc::new(SecurityManager::new()),
            config,
        )
        .unwrap();
        Self {
            mgr,
            resolver,
            service,
            root: Principal::root(),
        }
    }

    async fn namespace(&self) -> NamespaceRef {
        self.mgr.create(&self.root).await.unwrap()
    }

    fn caller(&self, ns: &NamespaceRef) -> Caller {
        Caller::new(ns.clone(), Arc::clone(&self.root), 100)
    }
}

fn nsid(raw: u32) -> NsId {
    NsId::new(raw).unwrap()
}

/// Build a request and pass it through the wire format
fn request(kind: u16, extra_flags: u16, attrs: Vec<Attr>) -> Message {
    let msg = Message::netns(kind, flags::REQUEST | extra_flags, 7, 100, attrs);
    let mut wire = msg.encode().unwrap();
    Message::decode(&mut wire).unwrap()
}

fn error_of(msg: &Message) -> (i32, Option<String>, Option<u32>) {
    let Payload::Error { code, attrs, .. } = &msg.payload else {
        panic!("expected an error reply, got {msg:?}");
    };
    let text = attrs
        .iter()
        .find(|a| a.kind() == NLMSGERR_ATTR_MSG)
        .map(|a| a.as_str().unwrap().to_string());
    let bad = attrs
        .iter()
        .find(|a| a.kind() == NLMSGERR_ATTR_BAD_ATTR)
        .map(|a| a.as_u32().unwrap());
    (*code, text, bad)
}

fn nsid_attr(msg: &Message, kind: u16) -> i32 {
    msg.attr(kind).unwrap().as_i32().unwrap()
}

#[tokio::test]
async fn test_newid_then_getid_by_pid() {
    let fx = Fixture::new(RtnlConfig::default());
    let a = fx.namespace().await;
    let b = fx.namespace().await;
    fx.resolver.bind_pid(ProcessId::from_raw(42), &b);
    let caller = fx.caller(&a);

    let replies = fx
        .service
        .handle(
            &caller,
            &request(
                RTM_NEWNSID,
                flags::ACK,
                vec![Attr::i32(NETNSA_NSID, 5), Attr::u32(NETNSA_PID, 42)],
            ),
        )
        .await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind(), NLMSG_ERROR);
    assert_eq!(error_of(&replies[0]).0, 0);
    assert_eq!(replies[0].header.seq, 7);
    assert_eq!(fx.mgr.lookup_id(&a, &b), Some(nsid(5)));

    let replies = fx
        .service
        .handle(
            &caller,
            &request(RTM_GETNSID, 0, vec![Attr::u32(NETNSA_PID, 42)]),
        )
        .await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind(), RTM_NEWNSID);
    assert_eq!(nsid_attr(&replies[0], NETNSA_NSID), 5);
    assert!(replies[0].attr(NETNSA_CURRENT_NSID).is_none());
    assert_eq!(fx.resolver.lookups(), 2);
}

#[tokio::test]
async fn test_newid_without_ack_is_silent() {
    let fx = Fixture::new(RtnlConfig::default());
    let a = fx.namespace().await;
    let b = fx.namespace().await;
    fx.resolver.bind_fd(3, &b);

    let replies = fx
        .service
        .handle(
            &fx.caller(&a),
            &request(
                RTM_NEWNSID,
                0,
                vec![Attr::i32(NETNSA_NSID, -1), Attr::u32(NETNSA_FD, 3)],
            ),
        )
        .await;
    assert!(replies.is_empty());
    // negative nsid: smallest free id
    assert_eq!(fx.mgr.lookup_id(&a, &b), Some(nsid(0)));
}

#[tokio::test]
async fn test_newid_conflicts() {
    let fx = Fixture::new(RtnlConfig::default());
    let a = fx.namespace().await;
    let b = fx.namespace().await;
    let c = fx.namespace().await;
    fx.resolver.bind_pid(ProcessId::from_raw(42), &b);
    fx.resolver.bind_pid(ProcessId::from_raw(43), &c);
    let caller = fx.caller(&a);
    let newid = |id: i32, pid: u32| {
        request(
            RTM_NEWNSID,
            0,
            vec![Attr::i32(NETNSA_NSID, id), Attr::u32(NETNSA_PID, pid)],
        )
    };

    assert!(fx.service.handle(&caller, &newid(5, 42)).await.is_empty());

    let replies = fx.service.handle(&caller, &newid(6, 42)).await;
    let (code, text, bad) = error_of(&replies[0]);
    assert_eq!(code, -libc::EEXIST);
    assert_eq!(text.as_deref(), Some("Peer netns already has a nsid assigned"));
    assert_eq!(bad, Some(u32::from(NETNSA_PID)));

    let replies = fx.service.handle(&caller, &newid(5, 43)).await;
    let (code, text, bad) = error_of(&replies[0]);
    assert_eq!(code, -libc::ENOSPC);
    assert_eq!(text.as_deref(), Some("The specified nsid is already used"));
    assert_eq!(bad, Some(u32::from(NETNSA_NSID)));
    assert_eq!(fx.mgr.lookup_id(&a, &c), None);
}

#[tokio::test]
async fn test_newid_missing_attributes() {
    let fx = Fixture::new(RtnlConfig::default());
    let a = fx.namespace().await;
    let caller = fx.caller(&a);

    let replies = fx
        .service
        .handle(&caller, &request(RTM_NEWNSID, 0, vec![Attr::u32(NETNSA_PID, 42)]))
        .await;
    let (code, text, _) = error_of(&replies[0]);
    assert_eq!(code, -libc::EINVAL);
    assert_eq!(text.as_deref(), Some("nsid is missing"));

    let replies = fx
        .service
        .handle(&caller, &request(RTM_NEWNSID, 0, vec![Attr::i32(NETNSA_NSID, 1)]))
        .await;
    let (code, text, _) = error_of(&replies[0]);
    assert_eq!(code, -libc::EINVAL);
    assert_eq!(text.as_deref(), Some("Peer netns reference is missing"));

    let replies = fx
        .service
        .handle(
            &caller,
            &request(
                RTM_NEWNSID,
                0,
                vec![Attr::i32(NETNSA_NSID, 1), Attr::u32(NETNSA_PID, 999)],
            ),
        )
        .await;
    let (code, text, bad) = error_of(&replies[0]);
    assert_eq!(code, -libc::ENOENT);
    assert_eq!(text.as_deref(), Some("Peer netns reference is invalid"));
    assert_eq!(bad, Some(u32::from(NETNSA_PID)));
}

#[tokio::test]
async fn test_malformed_attribute_points_at_it() {
    let fx = Fixture::new(RtnlConfig::default());
    let a = fx.namespace().await;

    let replies = fx
        .service
        .handle(
            &fx.caller(&a),
            &request(
                RTM_NEWNSID,
                0,
                vec![Attr::new(NETNSA_NSID, vec![1u8, 2]), Attr::u32(NETNSA_PID, 1)],
            ),
        )
        .await;
    let (code, _, bad) = error_of(&replies[0]);
    assert_eq!(code, -libc::EINVAL);
    assert_eq!(bad, Some(u32::from(NETNSA_NSID)));
}

#[tokio::test]
async fn test_getid_rejects_unsupported_attribute() {
    let fx = Fixture::new(RtnlConfig::default());
    let a = fx.namespace().await;

    let replies = fx
        .service
        .handle(
            &fx.caller(&a),
            &request(
                RTM_GETNSID,
                0,
                vec![Attr::u32(NETNSA_PID, 1), Attr::i32(NETNSA_CURRENT_NSID, 0)],
            ),
        )
        .await;
    let (code, text, bad) = error_of(&replies[0]);
    assert_eq!(code, -libc::EINVAL);
    assert_eq!(
        text.as_deref(),
        Some("Unsupported attribute in peer netns getid request")
    );
    assert_eq!(bad, Some(u32::from(NETNSA_CURRENT_NSID)));
}

#[tokio::test]
async fn test_getid_by_nsid() {
    let fx = Fixture::new(RtnlConfig::default());
    let a = fx.namespace().await;
    let b = fx.namespace().await;
    fx.mgr.allocate_id(&a, b.as_arc(), Some(nsid(2)), 0).unwrap();
    let caller = fx.caller(&a);

    let replies = fx
        .service
        .handle(&caller, &request(RTM_GETNSID, 0, vec![Attr::i32(NETNSA_NSID, 2)]))
        .await;
    assert_eq!(nsid_attr(&replies[0], NETNSA_NSID), 2);

    let replies = fx
        .service
        .handle(&caller, &request(RTM_GETNSID, 0, vec![Attr::i32(NETNSA_NSID, 50)]))
        .await;
    assert_eq!(error_of(&replies[0]).0, -libc::ENOENT);
}

#[tokio::test]
async fn test_getid_for_unmapped_peer_reports_not_assigned() {
    let fx = Fixture::new(RtnlConfig::default());
    let a = fx.namespace().await;
    let b = fx.namespace().await;
    fx.resolver.bind_pid(ProcessId::from_raw(42), &b);

    let replies = fx
        .service
        .handle(
            &fx.caller(&a),
            &request(RTM_GETNSID, 0, vec![Attr::u32(NETNSA_PID, 42)]),
        )
        .await;
    assert_eq!(nsid_attr(&replies[0], NETNSA_NSID), NsId::NOT_ASSIGNED);
    // lookups never allocate
    assert_eq!(fx.mgr.lookup_id(&a, &b), None);
}

#[tokio::test]
async fn test_getid_with_target() {
    let fx = Fixture::new(RtnlConfig::default());
    let a = fx.namespace().await;
    let target = fx.namespace().await;
    let peer = fx.namespace().await;
    fx.mgr.allocate_id(&a, target.as_arc(), Some(nsid(1)), 0).unwrap();
    fx.mgr.allocate_id(&a, peer.as_arc(), Some(nsid(2)), 0).unwrap();
    fx.mgr.allocate_id(&target, peer.as_arc(), Some(nsid(7)), 0).unwrap();
    fx.resolver.bind_pid(ProcessId::from_raw(42), &peer);
    let caller = fx.caller(&a);

    let replies = fx
        .service
        .handle(
            &caller,
            &request(
                RTM_GETNSID,
                0,
                vec![Attr::u32(NETNSA_PID, 42), Attr::i32(NETNSA_TARGET_NSID, 1)],
            ),
        )
        .await;
    assert_eq!(nsid_attr(&replies[0], NETNSA_NSID), 7);
    assert_eq!(nsid_attr(&replies[0], NETNSA_CURRENT_NSID), 2);

    let replies = fx
        .service
        .handle(
            &caller,
            &request(
                RTM_GETNSID,
                0,
                vec![Attr::u32(NETNSA_PID, 42), Attr::i32(NETNSA_TARGET_NSID, 99)],
            ),
        )
        .await;
    let (code, text, bad) = error_of(&replies[0]);
    assert_eq!(code, -libc::EINVAL);
    assert_eq!(text.as_deref(), Some("Target netns reference is invalid"));
    assert_eq!(bad, Some(u32::from(NETNSA_TARGET_NSID)));
}

#[tokio::test]
async fn test_unprivileged_caller_is_denied() {
    let fx = Fixture::new(RtnlConfig::default());
    let a = fx.namespace().await;
    let b = fx.namespace().await;
    fx.resolver.bind_pid(ProcessId::from_raw(42), &b);
    let guest = Arc::new(Principal::child(&fx.root, "guest", 1000, CapabilitySet::NONE));
    let caller = Caller::new(a.clone(), guest, 200);

    let replies = fx
        .service
        .handle(
            &caller,
            &request(
                RTM_NEWNSID,
                0,
                vec![Attr::i32(NETNSA_NSID, 1), Attr::u32(NETNSA_PID, 42)],
            ),
        )
        .await;
    let (code, text, _) = error_of(&replies[0]);
    assert_eq!(code, -libc::EACCES);
    assert!(text.unwrap().contains("CAP_NET_ADMIN"));
    assert_eq!(fx.mgr.lookup_id(&a, &b), None);

    // queries need no privilege unless they name a target
    let replies = fx
        .service
        .handle(&caller, &request(RTM_GETNSID, 0, vec![Attr::u32(NETNSA_PID, 42)]))
        .await;
    assert_eq!(replies[0].kind(), RTM_NEWNSID);
}

#[tokio::test]
async fn test_dump_is_paged() {
    let fx = Fixture::new(RtnlConfig::default().with_dump_batch(2));
    let a = fx.namespace().await;
    let mut peers = Vec::new();
    for _ in 0..3 {
        let peer = fx.namespace().await;
        fx.mgr.allocate_id(&a, peer.as_arc(), None, 0).unwrap();
        peers.push(peer);
    }
    let caller = fx.caller(&a);
    let dump = request(RTM_GETNSID, flags::DUMP, Vec::new());

    let mut cursor = DumpCursor::new();
    let first = fx.service.dump_page(&caller, &dump, &mut cursor);
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|m| m.header.flags & flags::MULTI != 0));
    assert_eq!(cursor.index(), 2);
    assert!(!cursor.is_done());

    let second = fx.service.dump_page(&caller, &dump, &mut cursor);
    assert_eq!(second.len(), 2);
    assert_eq!(nsid_attr(&second[0], NETNSA_NSID), 2);
    assert_eq!(second[1].kind(), NLMSG_DONE);
    assert!(cursor.is_done());
    assert!(fx.service.dump_page(&caller, &dump, &mut cursor).is_empty());

    let all = fx.service.handle(&caller, &dump).await;
    let ids: Vec<i32> = all
        .iter()
        .filter(|m| m.kind() == RTM_NEWNSID)
        .map(|m| nsid_attr(m, NETNSA_NSID))
        .collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(all.last().unwrap().kind(), NLMSG_DONE);
}

#[tokio::test]
async fn test_dump_of_target_carries_current_nsid() {
    let fx = Fixture::new(RtnlConfig::default());
    let a = fx.namespace().await;
    let target = fx.namespace().await;
    let seen = fx.namespace().await;
    let unseen = fx.namespace().await;
    fx.mgr.allocate_id(&a, target.as_arc(), Some(nsid(1)), 0).unwrap();
    fx.mgr.allocate_id(&a, seen.as_arc(), Some(nsid(4)), 0).unwrap();
    fx.mgr.allocate_id(&target, seen.as_arc(), Some(nsid(10)), 0).unwrap();
    fx.mgr.allocate_id(&target, unseen.as_arc(), Some(nsid(11)), 0).unwrap();

    let replies = fx
        .service
        .handle(
            &fx.caller(&a),
            &request(
                RTM_GETNSID,
                flags::DUMP,
                vec![Attr::i32(NETNSA_TARGET_NSID, 1)],
            ),
        )
        .await;
    assert_eq!(replies.len(), 3);
    assert_eq!(nsid_attr(&replies[0], NETNSA_NSID), 10);
    assert_eq!(nsid_attr(&replies[0], NETNSA_CURRENT_NSID), 4);
    assert_eq!(nsid_attr(&replies[1], NETNSA_NSID), 11);
    assert_eq!(
        nsid_attr(&replies[1], NETNSA_CURRENT_NSID),
        NsId::NOT_ASSIGNED
    );
    assert_eq!(replies[2].kind(), NLMSG_DONE);
}

#[tokio::test]
async fn test_dump_rejects_unsupported_attribute() {
    let fx = Fixture::new(RtnlConfig::default());
    let a = fx.namespace().await;

    let replies = fx
        .service
        .handle(
            &fx.caller(&a),
            &request(RTM_GETNSID, flags::DUMP, vec![Attr::i32(NETNSA_NSID, 0)]),
        )
        .await;
    assert_eq!(replies.len(), 1);
    let (code, text, bad) = error_of(&replies[0]);
    assert_eq!(code, -libc::EINVAL);
    assert_eq!(text.as_deref(), Some("Unsupported attribute in dump request"));
    assert_eq!(bad, Some(u32::from(NETNSA_NSID)));
}

#[tokio::test]
async fn test_unknown_message_type() {
    let fx = Fixture::new(RtnlConfig::default());
    let a = fx.namespace().await;

    let replies = fx
        .service
        .handle(&fx.caller(&a), &request(RTM_DELNSID, 0, Vec::new()))
        .await;
    assert_eq!(error_of(&replies[0]).0, -libc::EINVAL);
}

#[tokio::test]
async fn test_notifications_follow_peer_ids() {
    let fx = Fixture::new(RtnlConfig::default());
    let mut events = fx.mgr.subscribe();
    let a = fx.namespace().await;
    let b = fx.namespace().await;
    fx.resolver.bind_pid(ProcessId::from_raw(42), &b);

    fx.service
        .handle(
            &fx.caller(&a),
            &request(
                RTM_NEWNSID,
                0,
                vec![Attr::i32(NETNSA_NSID, 3), Attr::u32(NETNSA_PID, 42)],
            ),
        )
        .await;
    let event = events.recv().await.unwrap();
    assert!(matches!(event, NsidEvent::New { portid: 100, .. }));
    let msg = notification(&event);
    assert_eq!(msg.kind(), RTM_NEWNSID);
    assert_eq!(msg.header.portid, 100);
    assert_eq!(nsid_attr(&msg, NETNSA_NSID), 3);

    drop(b);
    fx.mgr.wait_idle().await;
    let event = events.recv().await.unwrap();
    assert!(matches!(event, NsidEvent::Deleted { .. }));
    let msg = notification(&event);
    assert_eq!(msg.kind(), RTM_DELNSID);
    assert_eq!(nsid_attr(&msg, NETNSA_NSID), 3);

    // the binding no longer resolves once the peer is gone
    let replies = fx
        .service
        .handle(
            &fx.caller(&a),
            &request(RTM_GETNSID, 0, vec![Attr::u32(NETNSA_PID, 42)]),
        )
        .await;
    assert_eq!(error_of(&replies[0]).0, -libc::ENOENT);
}
