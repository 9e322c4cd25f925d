//! Connection handshake
//!
//! Each bridge instance walks `Idle -> AwaitingPeerReady -> Connected`
//! exactly once. The app side ([`HandshakeServer`]) announces itself with
//! `client-create` and keeps re-announcing until the panel
//! ([`HandshakeClient`]) answers with `client-ready`. Acknowledgments that
//! arrive after the first one change nothing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::bridge::{Bridge, WeakBridge};
use crate::error::{BridgeError, HandshakeError};
use crate::event::BridgeEvent;

/// Interval between `client-create` announcements
pub const DEFAULT_RETRY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    Idle,
    AwaitingPeerReady,
    Connected,
}

/// State shared between the handshake and its bridge listeners
struct Progress {
    state: watch::Sender<HandshakeState>,
    aborted: watch::Sender<bool>,
}

impl Progress {
    fn new(bridge: &Bridge) -> Arc<Self> {
        let progress = Arc::new(Self {
            state: watch::channel(HandshakeState::Idle).0,
            aborted: watch::channel(false).0,
        });
        let on_disconnect = progress.clone();
        bridge.on(BridgeEvent::Disconnect, move |_| {
            on_disconnect.aborted.send_replace(true);
            Ok(())
        });
        progress
    }

    fn current(&self) -> HandshakeState {
        *self.state.borrow()
    }

    fn start(&self) {
        self.state.send_if_modified(|state| {
            if *state != HandshakeState::Idle {
                return false;
            }
            *state = HandshakeState::AwaitingPeerReady;
            true
        });
    }

    /// Move to `Connected`. Only the first call has any effect.
    fn complete(&self, bridge: &WeakBridge, signal: BridgeEvent) {
        let changed = self.state.send_if_modified(|state| {
            if *state == HandshakeState::Connected {
                return false;
            }
            *state = HandshakeState::Connected;
            true
        });
        let Some(bridge) = bridge.upgrade() else {
            return;
        };
        if changed {
            tracing::info!("[{}] handshake completed on {}", bridge.source(), signal);
            bridge.mark_connected();
        } else {
            tracing::debug!("[{}] duplicate {} ignored", bridge.source(), signal);
        }
    }

    async fn wait<F>(&self, retry: Option<Duration>, resend: F) -> Result<(), HandshakeError>
    where
        F: Fn() -> Result<(), BridgeError>,
    {
        let mut state = self.state.subscribe();
        let mut aborted = self.aborted.subscribe();
        loop {
            if *state.borrow_and_update() == HandshakeState::Connected {
                return Ok(());
            }
            if *aborted.borrow_and_update() {
                return Err(HandshakeError::Aborted);
            }

            let tick = async {
                match retry {
                    Some(interval) => tokio::time::sleep(interval).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        return Err(HandshakeError::Aborted);
                    }
                }
                changed = aborted.changed() => {
                    if changed.is_err() {
                        return Err(HandshakeError::Aborted);
                    }
                }
                _ = tick => send(&resend)?,
            }
        }
    }
}

fn send<F>(emit: &F) -> Result<(), HandshakeError>
where
    F: Fn() -> Result<(), BridgeError>,
{
    match emit() {
        Ok(()) => Ok(()),
        Err(BridgeError::Disconnected) => Err(HandshakeError::Aborted),
        Err(e) => Err(e.into()),
    }
}

/// App side of the handshake
pub struct HandshakeServer {
    bridge: Bridge,
    progress: Arc<Progress>,
    retry: Duration,
}

impl HandshakeServer {
    pub fn new(bridge: Bridge) -> Self {
        let progress = Progress::new(&bridge);

        let weak = bridge.downgrade();
        let on_ready = progress.clone();
        bridge.on(BridgeEvent::ClientReady, move |_| {
            on_ready.complete(&weak, BridgeEvent::ClientReady);
            Ok(())
        });

        Self {
            bridge,
            progress,
            retry: DEFAULT_RETRY,
        }
    }

    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.progress.current()
    }

    /// Announce presence and wait for the panel's acknowledgment.
    ///
    /// Resolves once per bridge; calling it again after success returns
    /// immediately. Fails with [`HandshakeError::Aborted`] if the bridge is
    /// torn down first.
    pub async fn on_connect(&self) -> Result<(), HandshakeError> {
        if self.state() == HandshakeState::Connected {
            return Ok(());
        }
        self.progress.start();

        let announce = || self.bridge.emit(BridgeEvent::ClientCreate, None);
        send(&announce)?;
        self.progress
            .wait(Some(self.retry), || {
                tracing::debug!("[{}] no client-ready yet, re-announcing", self.bridge.source());
                announce()
            })
            .await
    }
}

/// Panel side of the handshake
pub struct HandshakeClient {
    bridge: Bridge,
    progress: Arc<Progress>,
}

impl HandshakeClient {
    pub fn new(bridge: Bridge) -> Self {
        let progress = Progress::new(&bridge);

        let weak = bridge.downgrade();
        let on_create = progress.clone();
        bridge.on(BridgeEvent::ClientCreate, move |_| {
            if let Some(bridge) = weak.upgrade() {
                bridge.emit(BridgeEvent::ClientReady, None)?;
            }
            on_create.complete(&weak, BridgeEvent::ClientCreate);
            Ok(())
        });

        let weak = bridge.downgrade();
        let on_app = progress.clone();
        bridge.on(BridgeEvent::AppConnected, move |_| {
            on_app.complete(&weak, BridgeEvent::AppConnected);
            Ok(())
        });

        Self { bridge, progress }
    }

    pub fn state(&self) -> HandshakeState {
        self.progress.current()
    }

    /// Send one `client-ready` and wait until the app side shows up
    pub async fn on_connect(&self) -> Result<(), HandshakeError> {
        if self.state() == HandshakeState::Connected {
            return Ok(());
        }
        self.progress.start();
        send(&|| self.bridge.emit(BridgeEvent::ClientReady, None))?;
        self.progress.wait(None, || Ok(())).await
    }
}
