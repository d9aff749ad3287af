//! Connection registry: generation-checked records for active connections
//!
//! Two fixed-capacity lists, one for configured servers and one for other
//! peers. A record is addressed by a [`ConnHandle`] that packs list, slot
//! and generation into the opaque [`SessionHandle`] the protocol engine
//! carries; a handle to a closed record simply stops resolving instead of
//! aliasing whatever reuses the slot.

use lwm2m_core::{
    ContextId, Endpoint, InstanceId, RegistryError, SecureSessionId, SessionHandle, Timestamp,
    TransportKind,
};
use std::net::IpAddr;

// ----------------------------------------------------------------------------
// Connections
// ----------------------------------------------------------------------------

/// Which list a connection lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnList {
    Server,
    Peer,
}

/// Transport binding of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Udp,
    Dtls { session: SecureSessionId },
    Oscore { context: ContextId },
}

impl ConnectionKind {
    pub const fn transport(&self) -> TransportKind {
        match self {
            ConnectionKind::Udp => TransportKind::Udp,
            ConnectionKind::Dtls { .. } => TransportKind::Dtls,
            ConnectionKind::Oscore { .. } => TransportKind::Oscore,
        }
    }
}

/// One active connection record.
#[derive(Debug, Clone)]
pub struct Connection {
    pub remote: Endpoint,
    pub kind: ConnectionKind,
    /// The security instance this connection was resolved against
    pub security_instance: InstanceId,
    pub last_send: Timestamp,
}

// ----------------------------------------------------------------------------
// Handles
// ----------------------------------------------------------------------------

/// Internal address of a connection record.
///
/// Packs losslessly into a [`SessionHandle`]: list bit 63, slot bits 32..63,
/// generation bits 0..32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnHandle {
    pub list: ConnList,
    slot: u32,
    generation: u32,
}

impl ConnHandle {
    const LIST_BIT: u64 = 1 << 63;

    pub fn session(&self) -> SessionHandle {
        let list = match self.list {
            ConnList::Server => 0,
            ConnList::Peer => Self::LIST_BIT,
        };
        SessionHandle::from_raw(list | (self.slot as u64) << 32 | self.generation as u64)
    }

    pub fn from_session(session: SessionHandle) -> Self {
        let raw = session.raw();
        Self {
            list: if raw & Self::LIST_BIT == 0 {
                ConnList::Server
            } else {
                ConnList::Peer
            },
            slot: ((raw >> 32) & 0x7fff_ffff) as u32,
            generation: raw as u32,
        }
    }
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    conn: Option<Connection>,
}

/// The connection registry.
#[derive(Debug)]
pub struct ConnectionRegistry {
    servers: Vec<Slot>,
    peers: Vec<Slot>,
}

impl ConnectionRegistry {
    pub fn new(server_capacity: usize, peer_capacity: usize) -> Self {
        let slots = |n: usize| (0..n).map(|_| Slot::default()).collect();
        Self {
            servers: slots(server_capacity),
            peers: slots(peer_capacity),
        }
    }

    /// Insert a record. Rejects a second record for the same remote and
    /// transport, and a full list.
    pub fn insert(
        &mut self,
        list: ConnList,
        conn: Connection,
    ) -> Result<ConnHandle, RegistryError> {
        if self
            .iter()
            .any(|(_, c)| c.remote == conn.remote && c.kind.transport() == conn.kind.transport())
        {
            return Err(RegistryError::Duplicate {
                remote: conn.remote,
                kind: conn.kind.transport(),
            });
        }

        let slots = self.list_mut(list);
        let slot = slots
            .iter()
            .position(|s| s.conn.is_none())
            .ok_or(RegistryError::Exhausted {
                capacity: slots.len(),
            })?;
        slots[slot].conn = Some(conn);
        Ok(ConnHandle {
            list,
            slot: slot as u32,
            generation: slots[slot].generation,
        })
    }

    pub fn get(&self, handle: ConnHandle) -> Option<&Connection> {
        let slot = self.list(handle.list).get(handle.slot as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.conn.as_ref()
    }

    pub fn get_mut(&mut self, handle: ConnHandle) -> Option<&mut Connection> {
        let slot = self.list_mut(handle.list).get_mut(handle.slot as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.conn.as_mut()
    }

    /// Remove a record, invalidating every handle to it. A stale handle is a
    /// no-op returning `None`.
    pub fn close(&mut self, handle: ConnHandle) -> Option<Connection> {
        let slot = self.list_mut(handle.list).get_mut(handle.slot as usize)?;
        if slot.generation != handle.generation || slot.conn.is_none() {
            return None;
        }
        slot.generation = slot.generation.wrapping_add(1);
        slot.conn.take()
    }

    /// All records, servers first.
    pub fn iter(&self) -> impl Iterator<Item = (ConnHandle, &Connection)> {
        fn walk(
            list: ConnList,
            slots: &[Slot],
        ) -> impl Iterator<Item = (ConnHandle, &Connection)> + '_ {
            slots.iter().enumerate().filter_map(move |(i, s)| {
                s.conn.as_ref().map(|c| {
                    (
                        ConnHandle {
                            list,
                            slot: i as u32,
                            generation: s.generation,
                        },
                        c,
                    )
                })
            })
        }
        walk(ConnList::Server, &self.servers).chain(walk(ConnList::Peer, &self.peers))
    }

    /// First record matching the full endpoint, servers before peers.
    pub fn find_by_endpoint(&self, remote: Endpoint) -> Option<ConnHandle> {
        self.iter().find(|(_, c)| c.remote == remote).map(|(h, _)| h)
    }

    /// First record reachable from `remote` over the given socket family,
    /// servers before peers. Encrypted datagrams belong only to `Dtls`
    /// records; plain datagrams can belong to a `Udp` or a wrapped `Oscore`
    /// record.
    pub fn find_by_endpoint_transport(
        &self,
        remote: Endpoint,
        transport: TransportKind,
    ) -> Option<ConnHandle> {
        let encrypted = matches!(transport, TransportKind::Dtls);
        self.iter()
            .find(|(_, c)| {
                c.remote == remote
                    && matches!(c.kind, ConnectionKind::Dtls { .. }) == encrypted
            })
            .map(|(h, _)| h)
    }

    /// First record matching the address regardless of port.
    pub fn find_by_addr(&self, addr: IpAddr) -> Option<ConnHandle> {
        self.iter().find(|(_, c)| c.remote.addr == addr).map(|(h, _)| h)
    }

    pub fn find_by_secure_session(&self, session: SecureSessionId) -> Option<ConnHandle> {
        self.iter()
            .find(|(_, c)| matches!(c.kind, ConnectionKind::Dtls { session: s } if s == session))
            .map(|(h, _)| h)
    }

    pub fn find_by_context(&self, context: ContextId) -> Option<ConnHandle> {
        self.iter()
            .find(|(_, c)| matches!(c.kind, ConnectionKind::Oscore { context: x } if x == context))
            .map(|(h, _)| h)
    }

    pub fn find_by_instance(&self, instance: InstanceId) -> Option<ConnHandle> {
        self.iter()
            .find(|(_, c)| c.security_instance == instance)
            .map(|(h, _)| h)
    }

    pub fn len(&self, list: ConnList) -> usize {
        self.list(list).iter().filter(|s| s.conn.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len(ConnList::Server) == 0 && self.len(ConnList::Peer) == 0
    }

    fn list(&self, list: ConnList) -> &[Slot] {
        match list {
            ConnList::Server => &self.servers,
            ConnList::Peer => &self.peers,
        }
    }

    fn list_mut(&mut self, list: ConnList) -> &mut Vec<Slot> {
        match list {
            ConnList::Server => &mut self.servers,
            ConnList::Peer => &mut self.peers,
        }
    }
}
