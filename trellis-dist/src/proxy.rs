//! In-memory messaging fabric.
//!
//! Each component joins a [`Fabric`] under a unique name and receives a [`Proxy`],
//! through which it sends requests, replies, scatters work and gathers the replies
//! of a set of sessions. Delivery is reliable and in order between any two peers.
//! Receives block without a timeout.
use crate::messages::{Message, SessionMessage, SessionType};
use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, warn};
use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};
use trellis_core::error::TrellisError;

struct Peer {
    component_type: String,
    sender: Sender<SessionMessage>,
}

/// Registry of connected components.
///
/// Clones share the same registry.
#[derive(Clone, Default)]
pub struct Fabric {
    peers: Arc<Mutex<HashMap<String, Peer>>>,
    next_session_id: Arc<AtomicU64>,
}

impl Fabric {
    /// Creates an empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<String, Peer>> {
        match self.peers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Joins the fabric.
    ///
    /// Fails with [`TrellisError::DuplicatePeer`] if the name is already in use.
    pub fn connect(&self, component_type: &str, name: &str) -> Result<Proxy> {
        let (sender, receiver) = unbounded();
        {
            let mut peers = self.peers();
            if peers.contains_key(name) {
                return Err(TrellisError::DuplicatePeer(name.to_string()).into());
            }
            peers.insert(
                name.to_string(),
                Peer {
                    component_type: component_type.to_string(),
                    sender,
                },
            );
        }
        debug!("{} ({}) joined the fabric", name, component_type);

        Ok(Proxy {
            name: name.to_string(),
            fabric: self.clone(),
            receiver,
            backlog: VecDeque::new(),
            closed: false,
        })
    }

    /// Names of connected peers of the given component type, sorted.
    pub fn peers_of(&self, component_type: &str) -> Vec<String> {
        let mut names: Vec<_> = self
            .peers()
            .iter()
            .filter(|(_, peer)| peer.component_type == component_type)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Returns `true` if a peer with the name is connected.
    pub fn is_connected(&self, name: &str) -> bool {
        self.peers().contains_key(name)
    }

    fn deliver(&self, msg: SessionMessage) -> Result<()> {
        let sender = match self.peers().get(&msg.destination) {
            Some(peer) => peer.sender.clone(),
            None => return Err(TrellisError::PeerNotFound(msg.destination).into()),
        };
        let destination = msg.destination.clone();
        sender
            .send(msg)
            .map_err(|_| TrellisError::Disconnected(destination).into())
    }

    fn session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    fn disconnect(&self, name: &str) {
        if self.peers().remove(name).is_some() {
            debug!("{} left the fabric", name);
        }
    }
}

/// Endpoint of a component on a [`Fabric`].
///
/// The proxy leaves the fabric when closed or dropped.
pub struct Proxy {
    name: String,
    fabric: Fabric,
    receiver: Receiver<SessionMessage>,
    backlog: VecDeque<SessionMessage>,
    closed: bool,
}

impl Proxy {
    /// Name of the component.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fabric the proxy is connected to.
    pub fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    fn send_with(
        &self,
        destination: &str,
        message: Message,
        session_type: SessionType,
        session_id: u64,
    ) -> Result<u64> {
        self.fabric.deliver(SessionMessage {
            session_id,
            session_type,
            source: self.name.clone(),
            destination: destination.to_string(),
            message,
        })?;
        Ok(session_id)
    }

    /// Sends a request without waiting for the reply, returning its session id.
    pub fn isend(&self, destination: &str, message: Message) -> Result<u64> {
        self.send_with(destination, message, SessionType::Task, self.fabric.session_id())
    }

    /// Sends a message for which no reply is expected.
    pub fn notify(&self, destination: &str, message: Message) -> Result<()> {
        self.send_with(
            destination,
            message,
            SessionType::Notification,
            self.fabric.session_id(),
        )?;
        Ok(())
    }

    /// Sends one distinct request to each destination without waiting for replies.
    pub fn iscatter(&self, messages: Vec<(String, Message)>) -> Result<Vec<u64>> {
        messages
            .into_iter()
            .map(|(destination, message)| self.isend(&destination, message))
            .collect()
    }

    /// Sends a notification to every peer of the component type.
    ///
    /// Peers that cannot be reached are skipped. Returns the names of the peers reached.
    pub fn ibroadcast(&self, component_type: &str, message: Message) -> Vec<String> {
        let mut reached = vec![];
        for name in self.fabric.peers_of(component_type) {
            match self.notify(&name, message.clone()) {
                Ok(()) => reached.push(name),
                Err(e) => warn!("{}: skipped {} in broadcast: {}", self.name, name, e),
            }
        }
        reached
    }

    /// Replies to a request.
    pub fn reply(&self, request: &SessionMessage, message: Message) -> Result<()> {
        self.reply_to(&request.source, request.session_id, message)
    }

    /// Replies to the request of session `session_id` from `source`.
    pub fn reply_to(&self, source: &str, session_id: u64, message: Message) -> Result<()> {
        self.send_with(source, message, SessionType::Task, session_id)?;
        Ok(())
    }

    fn recv_channel(&self) -> Result<SessionMessage> {
        self.receiver
            .recv()
            .map_err(|_| TrellisError::Disconnected(self.name.clone()).into())
    }

    /// Blocks until a message arrives.
    ///
    /// Messages set aside by [`Proxy::gather`] are returned first.
    pub fn receive(&mut self) -> Result<SessionMessage> {
        match self.backlog.pop_front() {
            Some(msg) => Ok(msg),
            None => self.recv_channel(),
        }
    }

    /// Blocks until one message of each session has arrived, in any order.
    ///
    /// Replies are returned in order of arrival. Unrelated messages are kept
    /// for later calls to [`Proxy::receive`].
    pub fn gather(&mut self, sessions: &[u64]) -> Result<Vec<SessionMessage>> {
        let mut pending: BTreeSet<u64> = sessions.iter().copied().collect();
        let mut replies = Vec::with_capacity(pending.len());

        let mut kept = VecDeque::new();
        while let Some(msg) = self.backlog.pop_front() {
            if pending.remove(&msg.session_id) {
                replies.push(msg);
            } else {
                kept.push_back(msg);
            }
        }
        self.backlog = kept;

        while !pending.is_empty() {
            let msg = self.recv_channel()?;
            if pending.remove(&msg.session_id) {
                replies.push(msg);
            } else {
                debug!(
                    "{}: set aside {} from {} while gathering",
                    self.name,
                    msg.tag(),
                    msg.source
                );
                self.backlog.push_back(msg);
            }
        }
        Ok(replies)
    }

    /// Sends one distinct request to each destination and waits for all replies.
    pub fn scatter(&mut self, messages: Vec<(String, Message)>) -> Result<Vec<SessionMessage>> {
        let sessions = self.iscatter(messages)?;
        self.gather(&sessions)
    }

    /// Sends a request and waits for the reply.
    pub fn send(&mut self, destination: &str, message: Message) -> Result<SessionMessage> {
        let session = self.isend(destination, message)?;
        let mut replies = self.gather(&[session])?;
        replies
            .pop()
            .ok_or_else(|| TrellisError::Disconnected(destination.to_string()).into())
    }

    /// Leaves the fabric.
    pub fn close(&mut self) {
        if !self.closed {
            self.fabric.disconnect(&self.name);
            self.closed = true;
        }
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::messages::MsgTag;
    use std::thread;
    use test_log::test;

    #[test]
    fn test_duplicate_peer() {
        let fabric = Fabric::new();
        let _a = fabric.connect("x", "a").unwrap();
        let err = fabric.connect("x", "a").err().unwrap();
        assert!(matches!(
            err.downcast_ref::<TrellisError>(),
            Some(TrellisError::DuplicatePeer(_))
        ));
    }

    #[test]
    fn test_drop_leaves_fabric() {
        let fabric = Fabric::new();
        {
            let _a = fabric.connect("x", "a").unwrap();
            assert!(fabric.is_connected("a"));
        }
        assert!(!fabric.is_connected("a"));
        assert!(fabric.connect("x", "a").is_ok());
    }

    #[test]
    fn test_send_to_unknown_peer() {
        let fabric = Fabric::new();
        let a = fabric.connect("x", "a").unwrap();
        let err = a.isend("b", Message::Done).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<TrellisError>(),
            Some(TrellisError::PeerNotFound(name)) if name == "b"
        ));
    }

    #[test]
    fn test_gather_in_any_order_keeps_unrelated_messages() -> Result<()> {
        let fabric = Fabric::new();
        let mut manager = fabric.connect("m", "manager")?;
        let mut h0 = fabric.connect("h", "h0")?;
        let mut h1 = fabric.connect("h", "h1")?;
        let other = fabric.connect("o", "other")?;

        let sessions = manager.iscatter(vec![
            ("h0".to_string(), Message::Exit),
            ("h1".to_string(), Message::Exit),
        ])?;

        // h1 answers first, and an unrelated message arrives in between
        let req1 = h1.receive()?;
        h1.reply(&req1, Message::Done)?;
        other.notify("manager", Message::GetInitialPolicyState)?;
        let req0 = h0.receive()?;
        h0.reply(&req0, Message::Done)?;

        let replies = manager.gather(&sessions)?;
        assert_eq!(
            replies.iter().map(|r| r.source.as_str()).collect::<Vec<_>>(),
            vec!["h1", "h0"]
        );

        let unrelated = manager.receive()?;
        assert_eq!(unrelated.tag(), MsgTag::GetInitialPolicyState);
        assert_eq!(unrelated.session_type, SessionType::Notification);
        Ok(())
    }

    #[test]
    fn test_broadcast_by_component_type() -> Result<()> {
        let fabric = Fabric::new();
        let manager = fabric.connect("m", "manager")?;
        let mut workers: Vec<_> = (0..3)
            .map(|i| fabric.connect("w", &format!("w{}", i)))
            .collect::<Result<_>>()?;
        let _host = fabric.connect("h", "h0")?;

        let reached = manager.ibroadcast("w", Message::Exit);
        assert_eq!(reached, vec!["w0", "w1", "w2"]);
        for w in workers.iter_mut() {
            assert_eq!(w.receive()?.tag(), MsgTag::Exit);
        }
        assert!(manager.ibroadcast("nobody", Message::Exit).is_empty());
        Ok(())
    }

    #[test]
    fn test_request_reply_across_threads() -> Result<()> {
        let fabric = Fabric::new();
        let mut client = fabric.connect("c", "client")?;
        let mut server = fabric.connect("s", "server")?;
        let handle = thread::spawn(move || -> Result<()> {
            let req = server.receive()?;
            server.reply(&req, Message::Done)
        });
        let reply = client.send("server", Message::GetInitialPolicyState)?;
        assert_eq!(reply.tag(), MsgTag::Done);
        assert_eq!(reply.source, "server");
        handle.join().unwrap()?;
        Ok(())
    }
}
