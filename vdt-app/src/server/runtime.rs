//! Build-tool server runtime
//!
//! Binds a WebSocket listener on the first free port of the configured
//! range and gives every accepted socket its own bridge and rpc core. File
//! changes under the project root are pushed to all connected clients.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender, unbounded};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::accept_async;
use vdt_rpc::transport::WebSocketTransport;
use vdt_rpc::{Bridge, BridgeEvent, RpcCore, Source};

use super::assets::{self, AssetClassifier};
use super::graph::{self, ImportScanner};
use crate::config::ServerConfig;
use crate::error::ServerError;

/// Server lifecycle events, for whoever drives the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerNotification {
    Started { port: u16 },
    ClientConnected { peer: String },
    ClientDisconnected { peer: String },
    AssetsUpdated,
    ModuleUpdated { id: String },
    Stopped,
}

#[derive(Debug, Deserialize)]
struct TextAssetRequest {
    path: String,
    #[serde(default)]
    limit: Option<usize>,
}

struct ServerClient {
    peer: String,
    bridge: Bridge,
    rpc: RpcCore,
}

struct ServerInner {
    root: PathBuf,
    port: u16,
    text_asset_limit: usize,
    classifier: AssetClassifier,
    clients: RwLock<HashMap<u64, ServerClient>>,
    next_client: AtomicU64,
    shutdown: watch::Sender<bool>,
    notification_tx: Sender<ServerNotification>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl ServerInner {
    fn notify(&self, notification: ServerNotification) {
        let _ = self.notification_tx.send(notification);
    }

    /// Push `event` to every connected client
    fn broadcast(&self, event: BridgeEvent, payload: Option<Value>) {
        for client in self.clients.read().values() {
            if let Err(e) = client.rpc.notify(event, payload.clone()) {
                tracing::debug!("Failed to push {} to {}: {}", event, client.peer, e);
            }
        }
    }
}

/// Handle to a running build-tool server
pub struct BuildServer {
    inner: Arc<ServerInner>,
    notification_rx: Receiver<ServerNotification>,
}

impl BuildServer {
    /// Bind, start accepting connections and watch the project root.
    ///
    /// The root is `config.root`, or the working directory when unset.
    pub async fn start(config: &ServerConfig) -> Result<Self, ServerError> {
        let root = match &config.root {
            Some(root) => root.clone(),
            None => std::env::current_dir()?,
        };
        let root = root.canonicalize()?;
        let (listener, port) = bind(&config.host, config.base_port, config.port_attempts).await?;

        let (notification_tx, notification_rx) = unbounded();
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(ServerInner {
            root,
            port,
            text_asset_limit: config.text_asset_limit,
            classifier: AssetClassifier::new()?,
            clients: RwLock::new(HashMap::new()),
            next_client: AtomicU64::new(0),
            shutdown,
            notification_tx,
            watcher: Mutex::new(None),
        });

        match watch_root(&inner) {
            Ok(watcher) => *inner.watcher.lock() = Some(watcher),
            Err(e) => tracing::warn!("File change pushes disabled: {}", e),
        }

        tracing::info!("Build server listening on {}:{}", config.host, port);
        inner.notify(ServerNotification::Started { port });
        tokio::spawn(accept_loop(listener, inner.clone()));

        Ok(Self {
            inner,
            notification_rx,
        })
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.read().len()
    }

    pub fn notifications(&self) -> &Receiver<ServerNotification> {
        &self.notification_rx
    }

    /// Push an event to every connected client
    pub fn broadcast(&self, event: BridgeEvent, payload: Option<Value>) {
        self.inner.broadcast(event, payload);
    }

    /// Stop accepting, drop the watcher and disconnect every client
    pub fn shutdown(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        self.inner.watcher.lock().take();
        let clients: Vec<_> = self.inner.clients.write().drain().collect();
        for (_, client) in clients {
            client.bridge.teardown();
        }
        tracing::info!("Build server on port {} stopped", self.inner.port);
        self.inner.notify(ServerNotification::Stopped);
    }
}

impl Drop for BuildServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn bind(host: &str, base_port: u16, attempts: u16) -> Result<(TcpListener, u16), ServerError> {
    for offset in 0..attempts {
        let try_port = base_port.saturating_add(offset);
        match TcpListener::bind(format!("{host}:{try_port}")).await {
            Ok(listener) => {
                let port = listener.local_addr()?.port();
                return Ok((listener, port));
            }
            Err(e) => {
                tracing::debug!("Port {} unavailable: {}", try_port, e);
            }
        }
    }
    Err(ServerError::NoFreePort {
        first: base_port,
        last: base_port.saturating_add(attempts.saturating_sub(1)),
    })
}

async fn accept_loop(listener: TcpListener, inner: Arc<ServerInner>) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    tracing::info!("New connection from: {}", addr);
                    let inner = inner.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, inner).await {
                            tracing::error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => tracing::error!("Accept error: {}", e),
            },
            _ = stopped(&mut shutdown) => break,
        }
    }
    tracing::debug!("Accept loop on port {} finished", inner.port);
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    inner: Arc<ServerInner>,
) -> Result<(), ServerError> {
    let ws = accept_async(stream).await?;
    let peer = addr.to_string();
    let transport = Arc::new(WebSocketTransport::from_stream(ws, peer.clone()));

    let bridge = Bridge::new(Source::Server, transport.clone());
    bridge.mark_connected();
    let rpc = RpcCore::new(bridge.clone());
    register_functions(&rpc, Arc::downgrade(&inner));

    let id = inner.next_client.fetch_add(1, Ordering::Relaxed);
    inner.clients.write().insert(
        id,
        ServerClient {
            peer: peer.clone(),
            bridge: bridge.clone(),
            rpc,
        },
    );
    inner.notify(ServerNotification::ClientConnected { peer: peer.clone() });

    let mut shutdown = inner.shutdown.subscribe();
    tokio::select! {
        _ = transport.closed() => {}
        _ = stopped(&mut shutdown) => {}
    }

    inner.clients.write().remove(&id);
    bridge.teardown();
    tracing::info!("Client {} disconnected", peer);
    inner.notify(ServerNotification::ClientDisconnected { peer });
    Ok(())
}

fn upgrade(weak: &Weak<ServerInner>) -> anyhow::Result<Arc<ServerInner>> {
    weak.upgrade()
        .ok_or_else(|| anyhow::anyhow!("build server stopped"))
}

fn register_functions(rpc: &RpcCore, weak: Weak<ServerInner>) {
    let server = weak.clone();
    rpc.handle(BridgeEvent::ServerRoot, move |_| {
        Ok(Value::from(upgrade(&server)?.root.to_string_lossy()))
    });

    let server = weak.clone();
    rpc.handle_async(BridgeEvent::ServerStaticAssets, move |_| {
        let server = server.clone();
        async move {
            let inner = upgrade(&server)?;
            let assets = tokio::task::spawn_blocking(move || {
                assets::scan(&inner.root, &inner.classifier)
            })
            .await?;
            Ok::<_, anyhow::Error>(serde_json::to_value(assets)?)
        }
    });

    let server = weak.clone();
    rpc.handle(BridgeEvent::ServerImageMeta, move |request| {
        let path: String = request.parse()?;
        let meta = assets::image_meta(&upgrade(&server)?.root, &path)?;
        Ok(serde_json::to_value(meta)?)
    });

    let server = weak.clone();
    rpc.handle(BridgeEvent::ServerTextAssetContent, move |request| {
        let request: TextAssetRequest = request.parse()?;
        let inner = upgrade(&server)?;
        let limit = request.limit.unwrap_or(inner.text_asset_limit);
        Ok(Value::from(assets::text_content(&inner.root, &request.path, limit)?))
    });

    let server = weak;
    rpc.handle_async(BridgeEvent::ServerGraph, move |_| {
        let server = server.clone();
        async move {
            let inner = upgrade(&server)?;
            let modules = tokio::task::spawn_blocking(move || {
                ImportScanner::new().map(|scanner| scanner.graph(&inner.root))
            })
            .await??;
            Ok::<_, anyhow::Error>(serde_json::to_value(modules)?)
        }
    });
}

fn watch_root(inner: &Arc<ServerInner>) -> Result<RecommendedWatcher, ServerError> {
    let weak = Arc::downgrade(inner);
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Watch error: {}", e);
                return;
            }
        };
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            return;
        }
        if let Some(inner) = weak.upgrade() {
            on_change(&inner, &event.paths);
        }
    })?;
    watcher.watch(&inner.root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

fn on_change(inner: &ServerInner, paths: &[PathBuf]) {
    let mut assets_changed = false;
    for path in paths {
        let Some(id) = assets::relative_id(&inner.root, path) else {
            continue;
        };
        if assets::in_ignored_dir(Path::new(&id)) {
            continue;
        }
        if graph::is_module(path) {
            tracing::debug!("Module {} changed", id);
            inner.broadcast(BridgeEvent::ServerModuleUpdated, Some(Value::from(id.as_str())));
            inner.notify(ServerNotification::ModuleUpdated { id });
        } else if inner.classifier.classify(path).is_some() {
            assets_changed = true;
        }
    }
    if assets_changed {
        tracing::debug!("Assets changed under {}", inner.root.display());
        inner.broadcast(BridgeEvent::ServerAssetsUpdated, None);
        inner.notify(ServerNotification::AssetsUpdated);
    }
}
