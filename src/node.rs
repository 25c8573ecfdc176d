//! Node orchestrator tying together storage, the consensus engine and the
//! transport.
//!
//! The engine sits behind a `tokio::sync::Mutex` so inbound packs from the
//! network loop and local submissions are admitted strictly one at a time.
//! Only locally submitted packs are broadcast, and only when `node.relay` is
//! set.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::config::{Config, ConfigError};
use crate::consensus::{AdmissionError, Admitted, Engine};
use crate::crypto::keys::{KeyError, Keypair};
use crate::network::NetworkEvent;
use crate::state::{Ledger, StateError};
use crate::storage::{SledStorage, StorageError};
use crate::short;

/// Name of the node key file inside the data directory.
pub const KEY_FILE: &str = "node.key";

/// Node errors.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("ledger error: {0}")]
    State(#[from] StateError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Load or generate the node keypair.
///
/// Reads the 32-byte secret from `data_dir/node.key` if it exists; otherwise
/// generates a new keypair and writes it there, readable by the owner only.
pub fn load_or_generate_keypair(data_dir: &Path) -> Result<Keypair, NodeError> {
    let key_path = data_dir.join(KEY_FILE);

    if key_path.exists() {
        let bytes = zeroize::Zeroizing::new(std::fs::read(&key_path)?);
        let keypair = Keypair::from_secret_bytes(&bytes)?;
        tracing::info!("Loaded node key: {}", hex::encode(&keypair.address()[..8]));
        Ok(keypair)
    } else {
        std::fs::create_dir_all(data_dir)?;
        let keypair = Keypair::generate();
        std::fs::write(&key_path, keypair.secret_bytes().as_slice())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
        }
        tracing::info!("Generated node key: {}", hex::encode(&keypair.address()[..8]));
        Ok(keypair)
    }
}

/// Open the sled-backed ledger: `node.data_dir` when configured, otherwise
/// `data_dir/db`.
pub fn open_ledger(data_dir: &Path, config: &Config) -> Result<Ledger, NodeError> {
    let path = if config.node.data_dir.is_empty() {
        data_dir.join("db")
    } else {
        PathBuf::from(&config.node.data_dir)
    };
    let storage = SledStorage::open(&path)?;
    Ok(Ledger::new(Arc::new(storage)))
}

/// Initialize the ledger from the `[genesis]` config section. The node key
/// stands in for a missing genesis key.
pub fn init_genesis(ledger: &mut Ledger, config: &Config, keypair: &Keypair) -> Result<(), NodeError> {
    let genesis = config.genesis.to_genesis(Some(keypair.public_key()))?;
    ledger.initialize(&genesis)?;
    ledger.flush()?;
    Ok(())
}

/// Cloneable handle for submitting packs to a running node.
#[derive(Clone)]
pub struct NodeHandle {
    engine: Arc<Mutex<Engine>>,
    relay: bool,
}

impl NodeHandle {
    /// Admit a locally produced pack and broadcast it when relaying.
    pub async fn submit(&self, bytes: &[u8]) -> Result<Admitted, AdmissionError> {
        let mut engine = self.engine.lock().await;
        let admitted = engine.admit(bytes)?;
        if self.relay {
            engine.transport().broadcast(bytes);
        }
        Ok(admitted)
    }

    pub fn engine(&self) -> Arc<Mutex<Engine>> {
        Arc::clone(&self.engine)
    }
}

/// The node event loop.
pub struct Node {
    handle: NodeHandle,
    events: mpsc::UnboundedReceiver<NetworkEvent>,
}

impl Node {
    pub fn new(engine: Engine, events: mpsc::UnboundedReceiver<NetworkEvent>) -> Self {
        let relay = engine.config().node.relay;
        Node {
            handle: NodeHandle {
                engine: Arc::new(Mutex::new(engine)),
                relay,
            },
            events,
        }
    }

    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    /// Run until the event stream closes or Ctrl-C is received.
    pub async fn run(&mut self) {
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        tracing::info!("Network event stream closed");
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down");
                    break;
                }
            }
        }
        let engine = self.handle.engine.lock().await;
        if let Err(e) = engine.ledger().flush() {
            tracing::warn!("Failed to flush ledger: {}", e);
        }
    }

    async fn handle_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::PackReceived(bytes) => {
                let mut engine = self.handle.engine.lock().await;
                match engine.admit(&bytes) {
                    Ok(admitted) => {
                        tracing::debug!(pack = %short(&admitted.hash), "Accepted pack from network");
                    }
                    Err(AdmissionError::Duplicate) => {}
                    Err(e) => tracing::debug!("Rejected network pack: {}", e),
                }
            }
        }
    }
}
