//! `RTM_NEWNSID` / `RTM_GETNSID` request handling
//!
//! [`NsidService::handle`] takes one decoded request from a caller bound to
//! a namespace and returns every message the caller should receive: the
//! reply, an acknowledgement if one was asked for, dump pages, or a single
//! error reply. Failures never escape as `Err`; they become `NLMSG_ERROR`
//! messages with a negative status, a text attribute and, when one attribute
//! is to blame, its type.

use std::sync::Arc;

use tether_core::{Error, NsId, NsidEvent, ProcessId, Result};
use tether_namespace::{Namespace, NamespaceManager, NamespaceRef};
use tether_security::{Capability, CapabilityCheck, Principal};

use crate::attr::{
    Attr, NETNSA_CURRENT_NSID, NETNSA_FD, NETNSA_NSID, NETNSA_PID, NETNSA_TARGET_NSID,
    NLMSGERR_ATTR_BAD_ATTR, NLMSGERR_ATTR_MSG, NetnsAttrs,
};
use crate::config::RtnlConfig;
use crate::message::{Header, Message, RTM_DELNSID, RTM_GETNSID, RTM_NEWNSID, flags};
use crate::resolver::PeerResolver;
use crate::status::status_code;

/// Who sent a request
#[derive(Debug, Clone)]
pub struct Caller {
    /// Namespace the request was sent from
    pub ns: NamespaceRef,
    /// Principal that sent it
    pub principal: Arc<Principal>,
    /// Sending port; replies go back to it
    pub portid: u32,
}

impl Caller {
    /// Describe a caller
    #[must_use]
    pub const fn new(ns: NamespaceRef, principal: Arc<Principal>, portid: u32) -> Self {
        Self {
            ns,
            principal,
            portid,
        }
    }
}

/// Position in a resumable dump
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpCursor {
    index: usize,
    done: bool,
}

impl DumpCursor {
    /// Fresh cursor at the first entry
    #[must_use]
    pub const fn new() -> Self {
        Self {
            index: 0,
            done: false,
        }
    }

    /// Number of entries already emitted
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Whether the final page, ending in `NLMSG_DONE`, was produced
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }
}

/// A failed request: the error plus what the reply should point at
#[derive(Debug)]
struct Rejection {
    error: Error,
    message: Option<&'static str>,
    bad_attr: Option<u16>,
}

impl Rejection {
    fn invalid(message: &'static str) -> Self {
        Self {
            error: Error::invalid(message),
            message: Some(message),
            bad_attr: None,
        }
    }

    fn because(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }

    fn at(mut self, attr: u16) -> Self {
        self.bad_attr = Some(attr);
        self
    }

    fn into_reply(self, request: &Header) -> Message {
        let code = status_code(&self.error);
        tracing::debug!(
            kind = request.kind,
            seq = request.seq,
            code,
            bad_attr = ?self.bad_attr,
            error = %self.error,
            "Request rejected"
        );
        let text = self
            .message
            .map_or_else(|| self.error.to_string(), str::to_owned);
        let mut attrs = vec![Attr::string(NLMSGERR_ATTR_MSG, &text)];
        if let Some(bad) = self.bad_attr {
            attrs.push(Attr::u32(NLMSGERR_ATTR_BAD_ATTR, u32::from(bad)));
        }
        Message::error(request, code, attrs)
    }
}

impl From<Error> for Rejection {
    fn from(error: Error) -> Self {
        Self {
            error,
            message: None,
            bad_attr: None,
        }
    }
}

type Handled<T> = std::result::Result<T, Rejection>;

/// Peer-id protocol handler
pub struct NsidService {
    manager: Arc<NamespaceManager>,
    resolver: Arc<dyn PeerResolver>,
    security: Arc<dyn CapabilityCheck>,
    config: RtnlConfig,
}

impl NsidService {
    /// Create a handler
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if `config` is invalid
    pub fn new(
        manager: Arc<NamespaceManager>,
        resolver: Arc<dyn PeerResolver>,
        security: Arc<dyn CapabilityCheck>,
        config: RtnlConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            manager,
            resolver,
            security,
            config,
        })
    }

    /// The configuration in use
    #[must_use]
    pub const fn config(&self) -> &RtnlConfig {
        &self.config
    }

    /// Handle one request, running a dump to completion
    pub async fn handle(&self, caller: &Caller, request: &Message) -> Vec<Message> {
        if request.kind() == RTM_GETNSID && request.is_dump() {
            let mut cursor = DumpCursor::new();
            let mut out = Vec::new();
            while !cursor.is_done() {
                out.extend(self.dump_page(caller, request, &mut cursor));
            }
            return out;
        }

        let result = match request.kind() {
            RTM_NEWNSID => self.new_id(caller, request).await.map(|()| None),
            RTM_GETNSID => self.get_id(caller, request).await.map(Some),
            other => Err(Error::invalid(format!("unsupported message type {other}")).into()),
        };

        match result {
            Ok(reply) => {
                let mut out: Vec<_> = reply.into_iter().collect();
                if request.header.flags & flags::ACK != 0 {
                    out.push(Message::error(&request.header, 0, Vec::new()));
                }
                out
            }
            Err(rejection) => vec![rejection.into_reply(&request.header)],
        }
    }

    /// Produce the next page of a `RTM_GETNSID` dump.
    ///
    /// The last page ends with `NLMSG_DONE`; after that, or after an error
    /// reply, the cursor is done and further calls return nothing.
    pub fn dump_page(
        &self,
        caller: &Caller,
        request: &Message,
        cursor: &mut DumpCursor,
    ) -> Vec<Message> {
        if cursor.done {
            return Vec::new();
        }
        match self.dump_entries(caller, request, cursor) {
            Ok((mut page, finished)) => {
                if finished {
                    cursor.done = true;
                    page.push(Message::done(&request.header));
                }
                page
            }
            Err(rejection) => {
                cursor.done = true;
                vec![rejection.into_reply(&request.header)]
            }
        }
    }

    async fn new_id(&self, caller: &Caller, request: &Message) -> Handled<()> {
        let attrs = parse(request)?;
        self.require_net_admin(caller, &caller.ns, "RTM_NEWNSID")?;

        let Some(raw) = attrs.nsid else {
            return Err(Rejection::invalid("nsid is missing"));
        };
        let requested = NsId::from_wire(raw)?;
        let Some((peer, via)) = self.peer_by_handle(&attrs).await? else {
            return Err(Rejection::invalid("Peer netns reference is missing"));
        };

        self.manager
            .allocate_id(&caller.ns, peer.as_arc(), requested, caller.portid)
            .map_err(|e| match e {
                Error::AlreadyExists { .. } => Rejection::from(e)
                    .because("Peer netns already has a nsid assigned")
                    .at(via),
                Error::NoSpace { .. } if requested.is_some() => Rejection::from(e)
                    .because("The specified nsid is already used")
                    .at(NETNSA_NSID),
                other => Rejection::from(other),
            })?;
        Ok(())
    }

    async fn get_id(&self, caller: &Caller, request: &Message) -> Handled<Message> {
        let attrs = parse(request)?;
        if let Some(bad) =
            attrs.first_unsupported(&[NETNSA_PID, NETNSA_FD, NETNSA_NSID, NETNSA_TARGET_NSID])
        {
            return Err(
                Rejection::invalid("Unsupported attribute in peer netns getid request").at(bad),
            );
        }

        let peer = match self.peer_by_handle(&attrs).await? {
            Some((peer, _)) => peer,
            None => {
                let Some(raw) = attrs.nsid else {
                    return Err(Rejection::invalid("Peer netns reference is missing"));
                };
                NsId::from_wire(raw)?
                    .and_then(|id| self.manager.resolve_id(&caller.ns, id))
                    .ok_or_else(|| {
                        Rejection::from(Error::not_found(format!("peer with nsid {raw}")))
                            .because("Peer netns reference is invalid")
                            .at(NETNSA_NSID)
                    })?
            }
        };

        let target = attrs
            .target_nsid
            .map(|raw| {
                self.target_capable(caller, raw).map_err(|r| {
                    r.because("Target netns reference is invalid")
                        .at(NETNSA_TARGET_NSID)
                })
            })
            .transpose()?;

        let table: &Namespace = target.as_deref().unwrap_or(&*caller.ns);
        let mut reply = vec![Attr::nsid(NETNSA_NSID, self.manager.lookup_id(table, &peer))];
        if target.is_some() {
            reply.push(Attr::nsid(
                NETNSA_CURRENT_NSID,
                self.manager.lookup_id(&caller.ns, &peer),
            ));
        }
        Ok(Message::netns(
            RTM_NEWNSID,
            0,
            request.header.seq,
            caller.portid,
            reply,
        ))
    }

    fn dump_entries(
        &self,
        caller: &Caller,
        request: &Message,
        cursor: &mut DumpCursor,
    ) -> Handled<(Vec<Message>, bool)> {
        let attrs = parse(request)?;
        if let Some(bad) = attrs.first_unsupported(&[NETNSA_TARGET_NSID]) {
            return Err(Rejection::invalid("Unsupported attribute in dump request").at(bad));
        }
        let target = attrs
            .target_nsid
            .map(|raw| {
                self.target_capable(caller, raw).map_err(|r| {
                    r.because("Invalid target network namespace id")
                        .at(NETNSA_TARGET_NSID)
                })
            })
            .transpose()?;

        let (table, reference): (&Namespace, Option<&Namespace>) = match target.as_deref() {
            Some(target) => (target, Some(&*caller.ns)),
            None => (&*caller.ns, None),
        };

        let _section = self.manager.read_section();
        let entries = table.peer_ids().entries();
        let mut page = Vec::new();
        for (id, peer) in entries
            .iter()
            .skip(cursor.index)
            .take(self.config.dump_batch)
        {
            let mut attrs = vec![Attr::nsid(NETNSA_NSID, Some(*id))];
            if let Some(reference) = reference {
                let current = peer
                    .upgrade()
                    .and_then(|peer| reference.peer_ids().lookup(&peer));
                attrs.push(Attr::nsid(NETNSA_CURRENT_NSID, current));
            }
            page.push(Message::netns(
                RTM_NEWNSID,
                flags::MULTI,
                request.header.seq,
                caller.portid,
                attrs,
            ));
        }
        cursor.index += page.len();
        Ok((page, cursor.index >= entries.len()))
    }

    /// Peer named by `PID` or `FD`, with the attribute that named it
    async fn peer_by_handle(&self, attrs: &NetnsAttrs) -> Handled<Option<(NamespaceRef, u16)>> {
        let invalid = |via: u16| {
            move |e: Error| {
                Rejection::from(e)
                    .because("Peer netns reference is invalid")
                    .at(via)
            }
        };

        if let Some(pid) = attrs.pid {
            let pid = i32::try_from(pid)
                .map_err(|_| Error::not_found(format!("pid {pid}")))
                .map_err(invalid(NETNSA_PID))?;
            let peer = self
                .resolver
                .by_pid(ProcessId::from_raw(pid))
                .await
                .map_err(invalid(NETNSA_PID))?;
            return Ok(Some((peer, NETNSA_PID)));
        }
        if let Some(fd) = attrs.fd {
            let peer = self.resolver.by_fd(fd).await.map_err(invalid(NETNSA_FD))?;
            return Ok(Some((peer, NETNSA_FD)));
        }
        Ok(None)
    }

    /// Resolve `raw` in the caller's table and check `CAP_NET_ADMIN` over it
    fn target_capable(&self, caller: &Caller, raw: i32) -> Handled<NamespaceRef> {
        let target = NsId::from_wire(raw)?
            .and_then(|id| self.manager.resolve_id(&caller.ns, id))
            .ok_or_else(|| Error::invalid(format!("target nsid {raw} does not resolve")))?;
        self.require_net_admin(caller, &target, "target netns access")?;
        Ok(target)
    }

    fn require_net_admin(&self, caller: &Caller, ns: &Namespace, operation: &str) -> Handled<()> {
        let owner = ns
            .owner()
            .ok_or_else(|| Error::denied(format!("{operation} on a namespace being torn down")))?;
        self.security
            .require(&caller.principal, &owner, Capability::NetAdmin, operation)?;
        Ok(())
    }
}

impl std::fmt::Debug for NsidService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NsidService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn parse(request: &Message) -> Handled<NetnsAttrs> {
    NetnsAttrs::parse(request.attrs()).map_err(|(kind, e)| Rejection::from(e).at(kind))
}

/// Broadcast message for a peer-id event
#[must_use]
pub fn notification(event: &NsidEvent) -> Message {
    match event {
        NsidEvent::New { nsid, portid, .. } => Message::netns(
            RTM_NEWNSID,
            0,
            0,
            *portid,
            vec![Attr::nsid(NETNSA_NSID, Some(*nsid))],
        ),
        NsidEvent::Deleted { nsid, .. } => Message::netns(
            RTM_DELNSID,
            0,
            0,
            0,
            vec![Attr::nsid(NETNSA_NSID, Some(*nsid))],
        ),
    }
}
