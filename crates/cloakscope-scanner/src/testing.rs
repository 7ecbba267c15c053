//! Scripted network and store fixtures for unit tests.

use async_trait::async_trait;
use cloakscope_core::ProbingConfig;
use cloakscope_db::Database;
use cloakscope_probe::{
    HttpProber, HttpReply, HttpRequest, Method, ProbeError, ProfileCatalog, Prober, RateLimiter,
    RollingHashFingerprinter, Transport,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Route = Box<dyn Fn(&HttpRequest) -> Option<HttpReply> + Send + Sync>;

/// Transport answering from per-URL closures; unrouted URLs are refused.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: HashMap<String, Route>,
    sent: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedTransport {
    pub fn route<F>(mut self, url: &str, respond: F) -> Self
    where
        F: Fn(&HttpRequest) -> Option<HttpReply> + Send + Sync + 'static,
    {
        self.routes.insert(url.to_string(), Box::new(respond));
        self
    }

    pub fn sent_log(&self) -> Arc<Mutex<Vec<HttpRequest>>> {
        Arc::clone(&self.sent)
    }

    pub fn into_prober(self) -> Arc<dyn Prober> {
        Arc::new(HttpProber::new(
            Arc::new(self),
            Arc::new(ProfileCatalog::default()),
            Arc::new(RollingHashFingerprinter),
            Arc::new(RateLimiter::new(0)),
            &ProbingConfig::default(),
        ))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> cloakscope_probe::Result<HttpReply> {
        let reply = self
            .routes
            .get(request.url.as_str())
            .and_then(|respond| respond(&request));
        let keep_body = request.method == Method::Get && request.read_body;
        self.sent.lock().expect("lock").push(request);

        let mut reply =
            reply.ok_or_else(|| ProbeError::Transport("connection refused".to_string()))?;
        if !keep_body || !reply.is_success() {
            reply.body = None;
        }
        Ok(reply)
    }
}

pub fn page(body: &str) -> HttpReply {
    HttpReply {
        status: 200,
        headers: vec![("content-type".to_string(), "text/html".to_string())],
        body: Some(body.to_string()),
    }
}

pub fn redirect(to: &str) -> HttpReply {
    HttpReply {
        status: 302,
        headers: vec![("location".to_string(), to.to_string())],
        body: None,
    }
}

pub fn status(code: u16) -> HttpReply {
    HttpReply {
        status: code,
        ..HttpReply::default()
    }
}

pub async fn setup_db() -> Database {
    let db = Database::new(":memory:").await.expect("open database");
    db.run_migrations().await.expect("run migrations");
    db
}
