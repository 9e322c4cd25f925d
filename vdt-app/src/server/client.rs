use serde_json::{Value, json};
use vdt_rpc::transport::WebSocketTransport;
use vdt_rpc::{Bridge, BridgeEvent, ListenerId, RpcCore, RpcError, Source};

use super::assets::{AssetInfo, ImageMeta};
use super::graph::ModuleInfo;
use crate::error::ServerError;

/// Panel-side connection to the build-tool server
#[derive(Clone)]
pub struct BuildServerClient {
    rpc: RpcCore,
}

impl BuildServerClient {
    /// Connect to `url`, e.g. `ws://127.0.0.1:27040`
    pub async fn connect(url: &str) -> Result<Self, ServerError> {
        let transport = WebSocketTransport::connect(url).await?;
        Ok(Self::new(Bridge::new(Source::Client, transport)))
    }

    /// Wrap an existing bridge to the server. The socket being up counts
    /// as connected; there is no handshake on this channel.
    pub fn new(bridge: Bridge) -> Self {
        bridge.mark_connected();
        Self {
            rpc: RpcCore::new(bridge),
        }
    }

    pub fn rpc(&self) -> &RpcCore {
        &self.rpc
    }

    pub async fn root(&self) -> Result<String, RpcError> {
        self.rpc.call(BridgeEvent::ServerRoot, None).await
    }

    pub async fn static_assets(&self) -> Result<Vec<AssetInfo>, RpcError> {
        self.rpc.call(BridgeEvent::ServerStaticAssets, None).await
    }

    pub async fn image_meta(&self, path: &str) -> Result<ImageMeta, RpcError> {
        self.rpc
            .call(BridgeEvent::ServerImageMeta, Some(Value::from(path)))
            .await
    }

    /// First `limit` characters of a text asset, the server's default when
    /// `None`
    pub async fn text_asset_content(
        &self,
        path: &str,
        limit: Option<usize>,
    ) -> Result<String, RpcError> {
        self.rpc
            .call(
                BridgeEvent::ServerTextAssetContent,
                Some(json!({ "path": path, "limit": limit })),
            )
            .await
    }

    pub async fn graph(&self) -> Result<Vec<ModuleInfo>, RpcError> {
        self.rpc.call(BridgeEvent::ServerGraph, None).await
    }

    pub fn on_assets_updated<F>(&self, f: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.rpc
            .functions()
            .on(BridgeEvent::ServerAssetsUpdated, move |_| {
                f();
                Ok(())
            })
    }

    /// `f` receives the id of the changed module
    pub fn on_module_updated<F>(&self, f: F) -> ListenerId
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.rpc
            .functions()
            .on(BridgeEvent::ServerModuleUpdated, move |envelope| {
                f(envelope.parse()?);
                Ok(())
            })
    }

    pub fn disconnect(&self) {
        self.rpc.bridge().teardown();
    }
}
