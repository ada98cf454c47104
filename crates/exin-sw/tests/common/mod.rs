#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use exin_common::{init_logging, LogConfig};
use exin_net::{NetError, Network, Request, Response};
use exin_sw::{AgentConfig, MemoryCacheStorage, MemoryClients, OfflineAgent};
use http::{HeaderMap, StatusCode};
use url::Url;

pub const SCOPE: &str = "https://exin.example/app/";

pub type Agent = OfflineAgent<MemoryCacheStorage, ScriptedNetwork, MemoryClients>;

/// What the scripted network does for a URL.
#[derive(Debug, Clone)]
pub enum Route {
    Body(String),
    Status(u16),
    Offline,
    Hang,
}

/// Network double answering from a per-URL script.
///
/// Unscripted URLs answer `200` with `"<path>"` as body, unless the whole
/// network is switched offline.
#[derive(Default)]
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, Route>>,
    offline: Mutex<bool>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
    pub fn route(&self, url: &str, route: Route) {
        self.routes.lock().unwrap().insert(url.to_string(), route);
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls().iter().filter(|u| u.as_str() == url).count()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(url.clone());

        if *self.offline.lock().unwrap() {
            return Err(NetError::Offline(request.url));
        }

        let route = self.routes.lock().unwrap().get(&url).cloned();
        match route {
            None => {
                let body = request.url.path().to_string();
                Ok(Response::ok_with(request.url, "text/plain", body))
            }
            Some(Route::Body(body)) => Ok(Response::ok_with(request.url, "text/html", body)),
            Some(Route::Status(code)) => {
                let status = StatusCode::from_u16(code).unwrap();
                Ok(Response::new(request.url, status, HeaderMap::new(), Vec::new()))
            }
            Some(Route::Offline) => Err(NetError::Offline(request.url)),
            Some(Route::Hang) => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

pub fn init_test_logging() {
    let _ = init_logging(LogConfig::debug().with_filter("exin_sw=debug"));
}

pub fn url(path: &str) -> Url {
    Url::parse(SCOPE).unwrap().join(path).unwrap()
}

pub fn config(cache_name: &str, assets: &[&str]) -> AgentConfig {
    AgentConfig::new(Url::parse(SCOPE).unwrap())
        .with_cache_name(cache_name)
        .with_assets(assets.iter().copied())
}

pub fn agent_with(
    config: AgentConfig,
    caches: &Arc<MemoryCacheStorage>,
    network: &Arc<ScriptedNetwork>,
    clients: &Arc<MemoryClients>,
) -> Agent {
    OfflineAgent::new(
        config,
        Arc::clone(caches),
        Arc::clone(network),
        Arc::clone(clients),
    )
    .unwrap()
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
