//! Fixed-capacity connection registry with a multiplexed readiness poll.
//!
//! Each entry pairs a [`Connection`] with its readiness flag. The flag is
//! the poll registration: it lives and dies with the entry, so removing a
//! connection can never leave a stale registration behind.
//!
//! # Polling
//!
//! [`ConnectionSet::poll_readable`] registers read interest on every
//! socket at once and waits for the first wake-up, so the cost per poll
//! is one reactor wait no matter how many connections are registered.
//!
//! # Visiting ready slots
//!
//! ```text
//! poll_readable()  →  flags: [ _, R, _, R ]
//! take_next_ready() → 1    flags: [ _, _, _, R ]
//!   caller removes slot 1  flags: [ _, _, R ]
//! take_next_ready() → 2    flags: [ _, _, _ ]
//! take_next_ready() → None
//! ```
//!
//! Visiting clears the flag and always rescans from slot 0, so removing
//! the slot being visited neither skips nor revisits anything.

use std::future::poll_fn;
use std::task::Poll;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::{Connection, TransportError};

/// What to do with a slot after visiting it in
/// [`ConnectionSet::for_each_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Leave the connection in the set.
    Keep,
    /// Remove (and drop, closing) the connection.
    Remove,
}

#[derive(Debug)]
struct Entry {
    connection: Connection<TcpStream>,
    ready: bool,
}

/// A bounded, ordered set of live server-side connections.
///
/// Slot numbers are positions: removing slot `i` shifts every later slot
/// down by one.
///
/// Not internally synchronized. The owner (the server worker, or the
/// caller driving the server manually) must be the only one touching it.
#[derive(Debug)]
pub struct ConnectionSet {
    capacity: usize,
    entries: Vec<Entry>,
}

impl ConnectionSet {
    /// Creates an empty set that can hold `capacity` connections.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Maximum number of connections.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` if no further connection can be added.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Registers a connection and returns its slot.
    ///
    /// # Errors
    /// [`TransportError::CapacityExceeded`] if the set is full. The
    /// rejected connection is dropped, which closes it.
    pub fn add(
        &mut self,
        connection: Connection<TcpStream>,
    ) -> Result<usize, TransportError> {
        if self.is_full() {
            return Err(TransportError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.entries.push(Entry {
            connection,
            ready: false,
        });
        Ok(self.entries.len() - 1)
    }

    /// Unregisters the connection in `slot` and hands it back.
    pub fn remove(&mut self, slot: usize) -> Option<Connection<TcpStream>> {
        if slot >= self.entries.len() {
            return None;
        }
        Some(self.entries.remove(slot).connection)
    }

    /// Connection in `slot`, if any.
    pub fn get(&self, slot: usize) -> Option<&Connection<TcpStream>> {
        self.entries.get(slot).map(|e| &e.connection)
    }

    /// Mutable access to the connection in `slot`, if any.
    pub fn get_mut(
        &mut self,
        slot: usize,
    ) -> Option<&mut Connection<TcpStream>> {
        self.entries.get_mut(slot).map(|e| &mut e.connection)
    }

    /// Iterates connections in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Connection<TcpStream>> {
        self.entries.iter().map(|e| &e.connection)
    }

    /// Waits up to `timeout` for any registered connection to become
    /// readable and returns how many are.
    ///
    /// All readiness flags are recomputed. A zero `timeout` checks once
    /// without waiting. With nothing registered this simply sleeps for
    /// `timeout` and returns 0.
    pub async fn poll_readable(&mut self, timeout: Duration) -> usize {
        for entry in &mut self.entries {
            entry.ready = false;
        }
        let entries = &mut self.entries;
        let scan = poll_fn(|cx| {
            let mut count = 0;
            for entry in entries.iter_mut() {
                entry.ready = entry.connection.poll_read_ready(cx).is_ready();
                if entry.ready {
                    count += 1;
                }
            }
            if count > 0 {
                Poll::Ready(count)
            } else {
                Poll::Pending
            }
        });
        tokio::time::timeout(timeout, scan).await.unwrap_or(0)
    }

    /// `true` if the last poll found `slot` readable and it has not been
    /// visited since.
    pub fn is_ready(&self, slot: usize) -> bool {
        self.entries.get(slot).is_some_and(|e| e.ready)
    }

    /// Number of slots still flagged ready.
    pub fn ready_count(&self) -> usize {
        self.entries.iter().filter(|e| e.ready).count()
    }

    /// Returns the lowest slot still flagged ready and clears its flag.
    pub fn take_next_ready(&mut self) -> Option<usize> {
        let slot = self.entries.iter().position(|e| e.ready)?;
        self.entries[slot].ready = false;
        Some(slot)
    }

    /// Visits every ready slot in index order.
    ///
    /// Returning [`Visit::Remove`] drops the visited connection; the
    /// remaining ready slots are still visited exactly once.
    pub fn for_each_ready<F>(&mut self, mut visit: F)
    where
        F: FnMut(&mut Connection<TcpStream>, usize) -> Visit,
    {
        while let Some(slot) = self.take_next_ready() {
            if visit(&mut self.entries[slot].connection, slot) == Visit::Remove
            {
                self.entries.remove(slot);
            }
        }
    }

    /// Closes and unregisters every connection.
    pub async fn close_all(&mut self) {
        for mut entry in self.entries.drain(..) {
            entry.connection.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Opens `n` loopback pairs. Returns the server-side connections and
    /// the client-side raw streams.
    async fn pairs(n: usize) -> (Vec<Connection>, Vec<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut servers = Vec::new();
        let mut clients = Vec::new();
        for _ in 0..n {
            let client = TcpStream::connect(addr).await.unwrap();
            let (stream, peer) = listener.accept().await.unwrap();
            servers.push(Connection::accepted(stream, peer));
            clients.push(client);
        }
        (servers, clients)
    }

    #[tokio::test]
    async fn test_add_beyond_capacity_fails() {
        let (servers, _clients) = pairs(3).await;
        let mut set = ConnectionSet::with_capacity(2);
        let mut servers = servers.into_iter();
        assert_eq!(set.add(servers.next().unwrap()).unwrap(), 0);
        assert_eq!(set.add(servers.next().unwrap()).unwrap(), 1);
        assert!(set.is_full());
        let err = set.add(servers.next().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            TransportError::CapacityExceeded { capacity: 2 }
        ));
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn test_poll_on_empty_set_times_out() {
        let mut set = ConnectionSet::with_capacity(4);
        let count = set.poll_readable(Duration::from_millis(10)).await;
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_poll_reports_only_sockets_with_input() {
        use tokio::io::AsyncWriteExt;

        let (servers, mut clients) = pairs(3).await;
        let mut set = ConnectionSet::with_capacity(3);
        for conn in servers {
            set.add(conn).unwrap();
        }

        assert_eq!(set.poll_readable(Duration::ZERO).await, 0);

        clients[1].write_all(&[1, 0, 0, 0]).await.unwrap();
        let count = set.poll_readable(Duration::from_secs(2)).await;
        assert_eq!(count, 1);
        assert!(!set.is_ready(0));
        assert!(set.is_ready(1));
        assert!(!set.is_ready(2));
    }

    #[tokio::test]
    async fn test_removal_during_iteration_visits_each_ready_slot_once() {
        use tokio::io::AsyncWriteExt;

        let (servers, mut clients) = pairs(4).await;
        let mut set = ConnectionSet::with_capacity(4);
        let ids: Vec<_> = servers.iter().map(|c| c.id()).collect();
        for conn in servers {
            set.add(conn).unwrap();
        }
        for i in [0, 1, 3] {
            clients[i].write_all(&[2, 0, 0, 0]).await.unwrap();
        }

        // Wait until all three writes are visible.
        let mut count = 0;
        for _ in 0..50 {
            count = set.poll_readable(Duration::from_millis(50)).await;
            if count == 3 {
                break;
            }
        }
        assert_eq!(count, 3);

        let mut visited = Vec::new();
        set.for_each_ready(|conn, _slot| {
            visited.push(conn.id());
            if conn.id() == ids[1] {
                Visit::Remove
            } else {
                Visit::Keep
            }
        });

        assert_eq!(visited, vec![ids[0], ids[1], ids[3]]);
        assert_eq!(set.len(), 3);
        let remaining: Vec<_> = set.iter().map(|c| c.id()).collect();
        assert_eq!(remaining, vec![ids[0], ids[2], ids[3]]);
        assert_eq!(set.ready_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_peer_counts_as_readable() {
        let (servers, mut clients) = pairs(2).await;
        let mut set = ConnectionSet::with_capacity(2);
        for conn in servers {
            set.add(conn).unwrap();
        }
        drop(clients.remove(0));

        let count = set.poll_readable(Duration::from_secs(2)).await;
        assert_eq!(count, 1);
        let slot = set.take_next_ready().unwrap();
        assert_eq!(slot, 0);
        let conn = set.get_mut(slot).unwrap();
        assert!(conn.receive_request().await.is_err());
        set.remove(slot);
        assert_eq!(set.len(), 1);
        assert_eq!(set.take_next_ready(), None);
    }

    #[tokio::test]
    async fn test_close_all_empties_set() {
        let (servers, _clients) = pairs(2).await;
        let mut set = ConnectionSet::with_capacity(2);
        for conn in servers {
            set.add(conn).unwrap();
        }
        set.close_all().await;
        assert!(set.is_empty());
    }
}
