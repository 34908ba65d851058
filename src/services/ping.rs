//! Liveness method reachable without a service token.

use std::sync::Arc;

use pipeline_core::{Call, RpcResult};
use serde::{Deserialize, Serialize};

use crate::pipeline::{MethodTable, RpcService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingMethod {
    Ping,
}

impl PingMethod {
    pub const ALL: [Self; 1] = [Self::Ping];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PingRequest {}

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub ok: bool,
}

#[derive(Debug, Default)]
pub struct PingService;

impl PingService {
    async fn ping(self: Arc<Self>, _call: Call, _req: PingRequest) -> RpcResult<PingResponse> {
        Ok(PingResponse { ok: true })
    }
}

impl RpcService for PingService {
    fn method_table(self: Arc<Self>) -> MethodTable {
        MethodTable::new().method(PingMethod::Ping.as_str(), &self, Self::ping)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::pipeline::wrap_service;

    #[tokio::test]
    async fn ping_answers_ok() {
        let router = wrap_service(Arc::new(PingService).method_table());
        let out = router.handle(Call::new("ping", Value::Null)).await.unwrap();
        assert_eq!(out, json!({ "ok": true }));
    }

    #[test]
    fn every_method_is_registered() {
        let table = Arc::new(PingService).method_table();
        assert!(PingMethod::ALL.iter().all(|m| table.contains(m.as_str())));
    }
}
