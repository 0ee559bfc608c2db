//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use uuid::Uuid;

use datajud_gateway::clock::{ManualClock, SharedClock};
use datajud_gateway::config::GatewayConfig;
use datajud_gateway::credentials::CredentialView;
use datajud_gateway::domain::ProcessQuery;
use datajud_gateway::ports::{EventStore, MemoryStore, RequestRepository, StateRepository, Transport, TransportError, UpstreamCall, UpstreamResponse};
use datajud_gateway::service::NewCredential;
use datajud_gateway::Gateway;

pub const CNPJ_A: &str = "11222333000181";
pub const CNPJ_B: &str = "11444777000161";
pub const COURT: &str = "TJSP";

/// Process numbers long enough to pass validation.
pub fn process_number(n: u32) -> String {
    format!("{:07}-56.2023.8.26.0100", n)
}

/// Transport that replays scripted outcomes, then answers 200 with the
/// requested endpoint echoed back.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<UpstreamResponse, TransportError>>>,
    calls: Mutex<Vec<UpstreamCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, outcome: Result<UpstreamResponse, TransportError>) {
        self.script.lock().push_back(outcome);
    }

    pub fn push_status(&self, status: u16) {
        self.push(Err(TransportError::Status {
            status,
            body: String::new(),
        }));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.endpoint.clone()).collect()
    }

    pub fn credential_ids(&self) -> Vec<Uuid> {
        self.calls.lock().iter().map(|c| c.credential.id).collect()
    }
}

pub fn ok_response(body: serde_json::Value) -> UpstreamResponse {
    let size = body.to_string().len() as u64;
    UpstreamResponse {
        status: 200,
        body,
        size,
        duration: Duration::from_millis(5),
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, call: UpstreamCall) -> Result<UpstreamResponse, TransportError> {
        let endpoint = call.endpoint.clone();
        self.calls.lock().push(call);
        match self.script.lock().pop_front() {
            Some(outcome) => outcome,
            None => Ok(ok_response(json!({ "endpoint": endpoint }))),
        }
    }
}

/// Config tuned for tests: one worker, fast polling, no bulk throttle.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.admin.api_key = "test-admin-key".into();
    config.queue.workers = 1;
    config.queue.poll_interval_ms = 10;
    config.bulk.throttle_ms = 0;
    config.persistence.state_file = None;
    config.observability.metrics_enabled = false;
    config
}

pub struct TestGateway {
    pub gateway: Arc<Gateway>,
    pub clock: Arc<ManualClock>,
    pub transport: Arc<ScriptedTransport>,
    pub store: Arc<MemoryStore>,
}

pub async fn gateway_with(config: GatewayConfig) -> TestGateway {
    let clock = Arc::new(ManualClock::starting_now());
    let transport = ScriptedTransport::new();
    let store = Arc::new(MemoryStore::new());
    let gateway = Gateway::builder()
        .clock(clock.clone() as SharedClock)
        .transport(transport.clone() as Arc<dyn Transport>)
        .requests(store.clone() as Arc<dyn RequestRepository>)
        .state(store.clone() as Arc<dyn StateRepository>)
        .events(store.clone() as Arc<dyn EventStore>)
        .build(config)
        .await
        .unwrap();
    TestGateway {
        gateway: Arc::new(gateway),
        clock,
        transport,
        store,
    }
}

pub async fn gateway() -> TestGateway {
    gateway_with(test_config()).await
}

impl TestGateway {
    /// New tenant with a pool and one credential per CNPJ given.
    pub async fn tenant(&self, credentials: &[(&str, u32)]) -> (Uuid, Vec<CredentialView>) {
        let tenant = Uuid::new_v4();
        let management = self.gateway.management();
        management.create_pool(tenant, "default", None).await.unwrap();
        let mut views = Vec::new();
        for (cnpj, daily_limit) in credentials {
            let view = management
                .add_credential(
                    tenant,
                    NewCredential {
                        name: format!("key-{}", cnpj),
                        external_id: cnpj.to_string(),
                        secret: "secret".into(),
                        daily_limit: Some(*daily_limit),
                        priority: None,
                    },
                )
                .await
                .unwrap();
            views.push(view);
        }
        (tenant, views)
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

pub fn process_query(tenant_id: Uuid, number: &str) -> ProcessQuery {
    ProcessQuery {
        tenant_id,
        client_id: Uuid::new_v4(),
        process_id: None,
        process_number: number.to_string(),
        court_id: COURT.to_string(),
        use_cache: true,
        urgent: false,
    }
}
