//! Nsid command implementation

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tether_core::ProcessId;
use tether_namespace::NamespaceManager;
use tether_rtnl::attr::{
    NETNSA_CURRENT_NSID, NETNSA_FD, NETNSA_NSID, NETNSA_PID, NLMSGERR_ATTR_MSG,
};
use tether_rtnl::message::{self, RTM_DELNSID, RTM_GETNSID, RTM_NEWNSID, flags};
use tether_rtnl::{Attr, Caller, Message, NsidService, Payload, StaticResolver, notification};
use tether_security::{Principal, SecurityManager};

use crate::config::Settings;

const PEER_FD: u32 = 7;

pub async fn execute(config: Option<&Path>) -> Result<()> {
    let settings = Settings::load(config)?;
    let manager = Arc::new(
        NamespaceManager::start(settings.manager).context("Failed to start namespace manager")?,
    );
    let resolver = StaticResolver::new();
    let service = NsidService::new(
        Arc::clone(&manager),
        Arc::new(resolver.clone()),
        Arc::new(SecurityManager::new()),
        settings.rtnl,
    )
    .context("Failed to start nsid service")?;
    let mut events = manager.subscribe();

    let root = Principal::root();
    let home = manager.create(&root).await?;
    let by_pid = manager.create(&root).await?;
    let by_fd = manager.create(&root).await?;
    // this process stands in for a process living in `by_pid`
    let peer_pid = ProcessId::current();
    resolver.bind_pid(peer_pid, &by_pid);
    resolver.bind_fd(PEER_FD, &by_fd);
    let caller = Caller::new(home.clone(), Arc::clone(&root), 1);

    let pid = u32::try_from(peer_pid.as_raw())?;
    let script = [
        (
            "newid pid",
            Message::netns(
                RTM_NEWNSID,
                flags::REQUEST | flags::ACK,
                1,
                1,
                vec![Attr::i32(NETNSA_NSID, 10), Attr::u32(NETNSA_PID, pid)],
            ),
        ),
        (
            "newid fd (any id)",
            Message::netns(
                RTM_NEWNSID,
                flags::REQUEST | flags::ACK,
                2,
                1,
                vec![Attr::i32(NETNSA_NSID, -1), Attr::u32(NETNSA_FD, PEER_FD)],
            ),
        ),
        (
            "newid pid again",
            Message::netns(
                RTM_NEWNSID,
                flags::REQUEST,
                3,
                1,
                vec![Attr::i32(NETNSA_NSID, 11), Attr::u32(NETNSA_PID, pid)],
            ),
        ),
        (
            "getid pid",
            Message::netns(RTM_GETNSID, flags::REQUEST, 4, 1, vec![Attr::u32(NETNSA_PID, pid)]),
        ),
        (
            "getid bad attr",
            Message::netns(
                RTM_GETNSID,
                flags::REQUEST,
                5,
                1,
                vec![Attr::i32(NETNSA_CURRENT_NSID, 0)],
            ),
        ),
        (
            "dump",
            Message::netns(RTM_GETNSID, flags::REQUEST | flags::DUMP, 6, 1, Vec::new()),
        ),
    ];

    for (label, request) in script {
        let mut wire = request.encode().context("Failed to encode request")?;
        let decoded = Message::decode(&mut wire).context("Failed to decode request")?;
        let replies = service.handle(&caller, &decoded).await;
        let stream = message::encode_all(&replies).context("Failed to encode replies")?;

        println!("\n{label} (seq {})", request.header.seq);
        for reply in Message::decode_all(stream).context("Failed to decode replies")? {
            println!("  {}", describe(&reply));
        }
    }

    drop(by_pid);
    manager.wait_idle().await;

    println!("\nNotifications");
    while let Ok(event) = events.try_recv() {
        println!("  {}", describe(&notification(&event)));
    }

    drop((caller, home, by_fd));
    manager.shutdown().await;
    Ok(())
}

fn describe(msg: &Message) -> String {
    let nsid = |kind| {
        msg.attr(kind)
            .and_then(|a| a.as_i32().ok())
            .map_or_else(|| "-".to_string(), |v| v.to_string())
    };
    match &msg.payload {
        Payload::Error { code: 0, .. } => "ACK".to_string(),
        Payload::Error { code, .. } => {
            let text = msg
                .attr(NLMSGERR_ATTR_MSG)
                .and_then(|a| a.as_str().ok())
                .unwrap_or("");
            format!("ERROR {code} {text}")
        }
        Payload::Done => "DONE".to_string(),
        Payload::Netns { .. } => {
            let kind = match msg.kind() {
                RTM_NEWNSID => "NEWNSID",
                RTM_DELNSID => "DELNSID",
                _ => "?",
            };
            format!(
                "{kind} nsid={} current={}",
                nsid(NETNSA_NSID),
                nsid(NETNSA_CURRENT_NSID)
            )
        }
    }
}
