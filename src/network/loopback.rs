//! In-process transport: every endpoint of a hub sees every other endpoint's
//! broadcasts, and any pack ever broadcast can be queried back by hash.
//!
//! Frames pass through [`encode_message`]/[`decode_message`] exactly as
//! they would on a socket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::{decode_message, encode_message, Message, NetworkError, NetworkEvent, Transport};
use crate::{sha256, short, Hash};

#[derive(Default)]
struct Hub {
    packs: HashMap<Hash, Vec<u8>>,
    peers: Vec<(usize, mpsc::UnboundedSender<NetworkEvent>)>,
    next_id: usize,
}

impl Hub {
    fn join(&mut self) -> (usize, mpsc::UnboundedReceiver<NetworkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id;
        self.next_id += 1;
        self.peers.push((id, tx));
        (id, rx)
    }

    fn answer(&self, request: &[u8]) -> Result<Vec<u8>, NetworkError> {
        let response = match decode_message(request)? {
            Message::GetPack(hash) => Message::PackResponse(self.packs.get(&hash).cloned()),
            _ => return Err(NetworkError::Malformed),
        };
        encode_message(&response)
    }
}

/// One endpoint on a shared in-memory hub.
#[derive(Clone)]
pub struct LoopbackTransport {
    id: usize,
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackTransport {
    /// A fresh hub with a single endpoint and its inbound event stream.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NetworkEvent>) {
        let mut hub = Hub::default();
        let (id, rx) = hub.join();
        let transport = LoopbackTransport {
            id,
            hub: Arc::new(Mutex::new(hub)),
        };
        (transport, rx)
    }

    /// Another endpoint on the same hub.
    pub fn connect(&self) -> (Self, mpsc::UnboundedReceiver<NetworkEvent>) {
        let (id, rx) = self.with_hub(Hub::join);
        let transport = LoopbackTransport {
            id,
            hub: Arc::clone(&self.hub),
        };
        (transport, rx)
    }

    /// Make a pack queryable without announcing it.
    pub fn offer(&self, pack: &[u8]) {
        self.with_hub(|hub| hub.packs.insert(sha256(pack), pack.to_vec()));
    }

    fn with_hub<T>(&self, f: impl FnOnce(&mut Hub) -> T) -> T {
        let mut hub = match self.hub.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut hub)
    }
}

impl Transport for LoopbackTransport {
    fn broadcast(&self, pack: &[u8]) {
        let frame = match encode_message(&Message::Pack(pack.to_vec())) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unencodable broadcast");
                return;
            }
        };
        self.with_hub(|hub| {
            hub.packs.insert(sha256(pack), pack.to_vec());
            hub.peers.retain(|(_, tx)| !tx.is_closed());
            for (id, tx) in &hub.peers {
                if *id == self.id {
                    continue;
                }
                if let Ok(Message::Pack(bytes)) = decode_message(&frame) {
                    let _ = tx.send(NetworkEvent::PackReceived(bytes));
                }
            }
        });
    }

    fn query_by_hash(&self, hash: &Hash) -> Result<Vec<u8>, NetworkError> {
        let request = encode_message(&Message::GetPack(*hash))?;
        let response = self.with_hub(|hub| hub.answer(&request))?;
        match decode_message(&response)? {
            Message::PackResponse(Some(bytes)) => Ok(bytes),
            Message::PackResponse(None) => Err(NetworkError::NotFound(short(hash))),
            _ => Err(NetworkError::Malformed),
        }
    }
}
