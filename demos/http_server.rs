//! HTTP server exposing a small service through the warp adapter
//!
//! Run with:
//!
//! ```text
//! cargo run --example http_server --features http
//! ```
//!
//! Then call it:
//!
//! ```text
//! curl -s -X POST http://127.0.0.1:8080/rpc/calc \
//!     -H 'x-rpcflow-user: alice' -H 'x-rpcflow-roles: math' \
//!     -d '{"jsonrpc":"2.0","method":"add","params":[2,3],"id":1}'
//! ```

use rpcflow::server::{LoggingFilter, Validate, ValidationFilter};
use rpcflow::{
    http, rpc_service, Activation, BatchMode, CallContext, Error, JsonRpcErrorData, Requirement,
    RpcEndpoint,
};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Calculator {
    calls: AtomicU64,
}

#[derive(Deserialize)]
struct Range {
    from: i64,
    to: i64,
}

impl Validate for Range {
    fn validate(&self) -> Vec<String> {
        if self.from > self.to {
            vec!["from must not exceed to".to_string()]
        } else {
            Vec::new()
        }
    }
}

#[rpc_service(crate = rpcflow::server)]
impl Calculator {
    pub fn add(&self, a: i64, b: i64) -> i64 {
        self.calls.fetch_add(1, Ordering::Relaxed);
        a + b
    }

    pub fn divide(&self, a: i64, b: i64) -> Result<i64, Error> {
        if b == 0 {
            return Err(Error::JsonRpc(JsonRpcErrorData::new(1001, "division by zero")));
        }
        Ok(a / b)
    }

    pub fn sum(&self, range: Range) -> i64 {
        (range.from..=range.to).sum()
    }

    pub async fn whoami(&self, call: &CallContext) -> Option<String> {
        call.caller().name.clone()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("info,rpcflow_server=debug")
        .init();

    let endpoint = RpcEndpoint::builder()
        .base_path("/rpc")
        .batch_mode(BatchMode::Parallel)
        .max_batch_size(50)
        .configure(|api| {
            api.enable_compression()
                .apply_filter(|_| true, LoggingFilter::factory())
                .apply_filter(
                    |c| c.metadata.name == "sum",
                    ValidationFilter::new().validate_param::<Range>(0).into_factory(),
                )
                .authorize(Requirement::Role("math".into()))
                .expose_as("calc", Activation::shared(Calculator::default()));
        })
        .build()?;

    for descriptor in endpoint.registry().descriptors() {
        println!("  {} {}", descriptor.route(), descriptor.method());
    }
    println!("Listening on http://127.0.0.1:8080");

    warp::serve(http::rpc_filter(Arc::new(endpoint)))
        .run(([127, 0, 0, 1], 8080))
        .await;

    Ok(())
}
