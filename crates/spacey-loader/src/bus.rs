// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Request/response channel to a pipeline running elsewhere
//!
//! Requests are wrapped in an [`Envelope`] carrying a correlation id drawn
//! from a per-client counter. The channel itself is a [`Transport`], so the
//! same client drives an in-process pipeline (see [`InProcessTransport`])
//! or one behind an isolation boundary.

use crate::container::PluginContainer;
use crate::error::{LoaderError, Result};
use crate::plugin::{LoadResult, ResolvedId, TransformResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Capacity of the request queue of an in-process pipeline
const REQUEST_QUEUE: usize = 64;

/// A pipeline request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    /// Resolve a specifier
    ResolveId {
        /// Specifier as written
        specifier: String,
        /// Importing module
        importer: Option<String>,
    },
    /// Load a module id
    Load {
        /// Module id
        id: String,
    },
    /// Transform module code
    Transform {
        /// Raw code
        code: String,
        /// Module id
        id: String,
    },
}

/// A pipeline response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Result of [`Request::ResolveId`]
    ResolveId {
        /// Resolved id, if any plugin resolved it
        resolved: Option<ResolvedId>,
    },
    /// Result of [`Request::Load`]
    Load {
        /// Loaded code, if any plugin loaded it
        loaded: Option<LoadResult>,
    },
    /// Result of [`Request::Transform`]
    Transform {
        /// Transformed code
        result: TransformResult,
    },
    /// The request failed
    Error {
        /// Error message
        message: String,
    },
}

/// A message with its correlation id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Correlation id, unique per client
    pub id: u64,
    /// Payload
    pub body: T,
}

/// Carries requests to a pipeline and brings back the matching response
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the response with the same id
    async fn send(&self, request: Envelope<Request>) -> Result<Envelope<Response>>;
}

/// Serve one request against a container
pub async fn handle_request(container: &PluginContainer, request: Request) -> Response {
    let result = match request {
        Request::ResolveId { specifier, importer } => container
            .resolve_id(&specifier, importer.as_deref())
            .await
            .map(|resolved| Response::ResolveId { resolved }),
        Request::Load { id } => container.load(&id).await.map(|loaded| Response::Load { loaded }),
        Request::Transform { code, id } => container
            .transform(code, &id)
            .await
            .map(|result| Response::Transform { result }),
    };

    result.unwrap_or_else(|e| Response::Error { message: e.to_string() })
}

/// Runs a container on background tasks behind a channel
#[derive(Debug)]
pub struct InProcessTransport {
    requests: mpsc::Sender<Envelope<Request>>,
    pending: Arc<DashMap<u64, oneshot::Sender<Envelope<Response>>>>,
}

impl InProcessTransport {
    /// Spawn the server and response router tasks. Must be called inside a
    /// tokio runtime.
    pub fn spawn(container: Arc<PluginContainer>) -> Self {
        let (requests, mut incoming) = mpsc::channel::<Envelope<Request>>(REQUEST_QUEUE);
        let (responses, mut outgoing) = mpsc::unbounded_channel::<Envelope<Response>>();
        let pending: Arc<DashMap<u64, oneshot::Sender<Envelope<Response>>>> = Arc::new(DashMap::new());

        tokio::spawn(async move {
            while let Some(request) = incoming.recv().await {
                let container = Arc::clone(&container);
                let responses = responses.clone();
                tokio::spawn(async move {
                    let body = handle_request(&container, request.body).await;
                    let _ = responses.send(Envelope { id: request.id, body });
                });
            }
            debug!("Pipeline request channel closed");
        });

        let routes = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(response) = outgoing.recv().await {
                match routes.remove(&response.id) {
                    Some((_, waiter)) => {
                        let _ = waiter.send(response);
                    }
                    None => warn!(id = response.id, "Dropping response with no pending request"),
                }
            }
        });

        Self { requests, pending }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn send(&self, request: Envelope<Request>) -> Result<Envelope<Response>> {
        let id = request.id;
        let (waiter, response) = oneshot::channel();
        if self.pending.insert(id, waiter).is_some() {
            return Err(LoaderError::Channel(format!("correlation id {} already in flight", id)));
        }

        if self.requests.send(request).await.is_err() {
            self.pending.remove(&id);
            return Err(LoaderError::Channel("pipeline is not running".to_string()));
        }

        response
            .await
            .map_err(|_| LoaderError::Channel(format!("response to request {} was dropped", id)))
    }
}

/// Typed client over a [`Transport`]
#[derive(Debug)]
pub struct BusClient<T> {
    transport: T,
    next_id: AtomicU64,
}

impl<T: Transport> BusClient<T> {
    /// Create a client
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn call(&self, body: Request) -> Result<Response> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self.transport.send(Envelope { id, body }).await?;
        if response.id != id {
            return Err(LoaderError::Channel(format!(
                "expected response {} but received {}",
                id, response.id
            )));
        }
        match response.body {
            Response::Error { message } => Err(LoaderError::Generic(message)),
            body => Ok(body),
        }
    }

    /// Resolve a specifier remotely
    pub async fn resolve_id(&self, specifier: &str, importer: Option<&str>) -> Result<Option<ResolvedId>> {
        let request = Request::ResolveId {
            specifier: specifier.to_string(),
            importer: importer.map(str::to_string),
        };
        match self.call(request).await? {
            Response::ResolveId { resolved } => Ok(resolved),
            other => Err(unexpected(&other)),
        }
    }

    /// Load a module remotely
    pub async fn load(&self, id: &str) -> Result<Option<LoadResult>> {
        match self.call(Request::Load { id: id.to_string() }).await? {
            Response::Load { loaded } => Ok(loaded),
            other => Err(unexpected(&other)),
        }
    }

    /// Transform module code remotely
    pub async fn transform(&self, code: &str, id: &str) -> Result<TransformResult> {
        let request = Request::Transform {
            code: code.to_string(),
            id: id.to_string(),
        };
        match self.call(request).await? {
            Response::Transform { result } => Ok(result),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &Response) -> LoaderError {
    LoaderError::Channel(format!("unexpected response: {:?}", response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigEnv, UserConfig};
    use crate::plugin::{Hook, HookSpec, Plugin, PluginContext, ResolveIdOptions};
    use parking_lot::Mutex;
    use tempfile::tempdir;

    struct Echo;

    #[async_trait]
    impl Plugin for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn hooks(&self) -> Vec<HookSpec> {
            vec![Hook::ResolveId.into(), Hook::Load.into(), Hook::Transform.into()]
        }

        async fn resolve_id(
            &self,
            _ctx: &PluginContext<'_>,
            specifier: &str,
            _importer: Option<&str>,
            _options: ResolveIdOptions,
        ) -> Result<Option<ResolvedId>> {
            Ok(specifier
                .strip_prefix("virtual:")
                .map(|name| ResolvedId::new(format!("\0virtual:{}", name))))
        }

        async fn load(&self, _ctx: &PluginContext<'_>, id: &str) -> Result<Option<LoadResult>> {
            Ok(id
                .strip_prefix("\0virtual:")
                .map(|name| LoadResult::new(format!("export default '{}';", name))))
        }

        async fn transform(&self, _ctx: &PluginContext<'_>, code: &str, id: &str) -> Result<Option<TransformResult>> {
            if code.contains("throw") {
                return Err(LoaderError::Generic("refusing to transform".to_string()));
            }
            if code.starts_with("slow") {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            Ok(Some(TransformResult::new(format!("{} // {}", code, id))))
        }
    }

    /// Records correlation ids on the way through
    struct Recording {
        inner: InProcessTransport,
        ids: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl Transport for Recording {
        async fn send(&self, request: Envelope<Request>) -> Result<Envelope<Response>> {
            self.ids.lock().push(request.id);
            self.inner.send(request).await
        }
    }

    async fn spawn_pipeline() -> (tempfile::TempDir, InProcessTransport) {
        let dir = tempdir().unwrap();
        let config = UserConfig {
            root: Some(dir.path().to_path_buf()),
            cache: Some(false),
            ..Default::default()
        };
        let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(Echo)];
        let container = PluginContainer::new(plugins, config, ConfigEnv::default()).await.unwrap();
        (dir, InProcessTransport::spawn(Arc::new(container)))
    }

    #[tokio::test]
    async fn test_round_trip_through_channel() {
        let (_dir, transport) = spawn_pipeline().await;
        let client = BusClient::new(transport);

        let resolved = client.resolve_id("virtual:entry", None).await.unwrap().unwrap();
        assert_eq!(resolved.id, "\0virtual:entry");

        let loaded = client.load(&resolved.id).await.unwrap().unwrap();
        assert_eq!(loaded.code, "export default 'entry';");

        let result = client.transform(&loaded.code, &resolved.id).await.unwrap();
        assert_eq!(result.code, "export default 'entry'; // \0virtual:entry");

        assert_eq!(client.resolve_id("plain", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_correlation_ids_increase() {
        let (_dir, inner) = spawn_pipeline().await;
        let client = BusClient::new(Recording {
            inner,
            ids: Mutex::new(Vec::new()),
        });

        let (a, b, c) = tokio::join!(
            client.transform("a", "\0virtual:a"),
            client.transform("b", "\0virtual:b"),
            client.transform("c", "\0virtual:c"),
        );
        assert_eq!(a.unwrap().code, "a // \0virtual:a");
        assert_eq!(b.unwrap().code, "b // \0virtual:b");
        assert_eq!(c.unwrap().code, "c // \0virtual:c");

        let mut ids = client.transport().ids.lock().clone();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_errors_come_back_as_errors() {
        let (_dir, transport) = spawn_pipeline().await;
        let client = BusClient::new(transport);

        let err = client.transform("throw", "\0virtual:x").await.unwrap_err();
        assert!(err.to_string().contains("refusing to transform"));
        assert!(err.to_string().contains("[echo]"));
    }

    #[tokio::test]
    async fn test_concurrent_requests_for_one_file_keep_cache_consistent() {
        let dir = tempdir().unwrap();
        let config = UserConfig {
            root: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(Echo)];
        let container = Arc::new(PluginContainer::new(plugins, config, ConfigEnv::default()).await.unwrap());
        let client = BusClient::new(InProcessTransport::spawn(Arc::clone(&container)));
        let id = format!("{}/src/a.js", dir.path().display());

        let (first, second) = tokio::join!(client.transform("slow", &id), async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            client.transform("fast", &id).await
        });
        assert_eq!(first.unwrap().code, format!("slow // {}", id));
        assert_eq!(second.unwrap().code, format!("fast // {}", id));

        let cache = container.cache().unwrap();
        assert_eq!(cache.entry(&id).unwrap().hash, crate::cache::content_hash("fast"));
        assert_eq!(cache.load_cached(&id).await, Some(format!("fast // {}", id)));
    }

    #[test]
    fn test_wire_format() {
        let envelope = Envelope {
            id: 7,
            body: Request::Load { id: "/app/a.js".to_string() },
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json, serde_json::json!({ "id": 7, "body": { "type": "load", "id": "/app/a.js" } }));
    }
}
