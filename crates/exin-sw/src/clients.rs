//! Clients: the open pages and workers an agent may control.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::AgentError;

/// A client (controlled page or worker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Frame type.
    pub frame_type: FrameType,

    /// Cache name of the agent controlling this client, if any.
    pub controller: Option<String>,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// Frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Auxiliary,
    TopLevel,
    Nested,
    None,
}

/// Options for [`ClientRegistry::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

impl ClientMatchOptions {
    fn accepts(&self, client: &Client) -> bool {
        if !self.include_uncontrolled && client.controller.is_none() {
            return false;
        }
        match self.client_type {
            ClientType::All => true,
            t => client.client_type == t,
        }
    }
}

/// Client registry capability.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Make `controller` the controller of every client inside `scope`.
    /// Returns how many clients changed controller.
    async fn claim(&self, scope: &Url, controller: &str) -> Result<usize, AgentError>;

    /// List clients.
    async fn match_all(&self, options: ClientMatchOptions) -> Vec<Client>;
}

/// In-process [`ClientRegistry`].
#[derive(Debug, Default)]
pub struct MemoryClients {
    clients: RwLock<HashMap<String, Client>>,
}

impl MemoryClients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// Open an uncontrolled top-level window.
    pub async fn open_window(&self, url: &str) -> Result<Client, AgentError> {
        let url = Url::parse(url).map_err(|e| AgentError::Clients(e.to_string()))?;

        let client = Client {
            id: format!("client-{}", uuid_simple()),
            url,
            client_type: ClientType::Window,
            frame_type: FrameType::TopLevel,
            controller: None,
        };

        self.add(client.clone()).await;
        Ok(client)
    }

    /// Add a client.
    pub async fn add(&self, client: Client) {
        self.clients.write().await.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub async fn remove(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id)
    }
}

#[async_trait]
impl ClientRegistry for MemoryClients {
    async fn claim(&self, scope: &Url, controller: &str) -> Result<usize, AgentError> {
        let mut clients = self.clients.write().await;
        let mut claimed = 0;
        for client in clients.values_mut() {
            if !client.url.as_str().starts_with(scope.as_str()) {
                continue;
            }
            if client.controller.as_deref() != Some(controller) {
                client.controller = Some(controller.to_string());
                claimed += 1;
            }
        }
        debug!(scope = %scope, controller, claimed, "Clients claimed");
        Ok(claimed)
    }

    async fn match_all(&self, options: ClientMatchOptions) -> Vec<Client> {
        self.clients
            .read()
            .await
            .values()
            .filter(|c| options.accepts(c))
            .cloned()
            .collect()
    }
}

/// Generate a simple UUID-like string.
fn uuid_simple() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!(
        "{:016x}-{:04x}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
