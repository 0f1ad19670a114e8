//! Using rpcflow through the umbrella crate

use async_trait::async_trait;
use rpcflow::server::{ExecutionContext, MethodAuthorization};
use rpcflow::{rpc_service, Activation, CallerIdentity, InboundRequest, RpcEndpoint};
use serde_json::{json, Value};
use std::sync::Arc;

struct Notes {
    owner: String,
}

#[rpc_service(crate = rpcflow::server)]
impl Notes {
    pub fn owner(&self) -> String {
        self.owner.clone()
    }

    pub async fn shout(&self, text: String) -> String {
        text.to_uppercase()
    }
}

/// Grants access to callers holding the `editor` role
struct EditorsOnly;

#[async_trait]
impl MethodAuthorization for EditorsOnly {
    async fn authorize(&self, ctx: &ExecutionContext) -> bool {
        ctx.caller().roles.iter().any(|role| role == "editor")
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("rpcflow_server=debug")
        .try_init();
}

fn endpoint() -> RpcEndpoint {
    RpcEndpoint::builder()
        .base_path("/notes")
        .configure(|api| {
            api.authorize_with(|_| vec![Arc::new(EditorsOnly) as Arc<dyn MethodAuthorization>])
                .expose_as(
                    "",
                    Activation::shared(Notes {
                        owner: "ada".into(),
                    }),
                );
        })
        .build()
        .unwrap()
}

async fn send(endpoint: &RpcEndpoint, body: Value, caller: CallerIdentity) -> Value {
    let request = InboundRequest::new("/notes", body.to_string()).with_caller(caller);
    let response = endpoint.handle(request).await.unwrap();
    serde_json::from_slice(&response.body).unwrap()
}

#[tokio::test]
async fn test_editor_reaches_service() {
    init_tracing();
    let endpoint = endpoint();
    let editor = CallerIdentity::authenticated("grace").with_role("editor");

    let body = send(
        &endpoint,
        json!({"jsonrpc": "2.0", "method": "shout", "params": {"text": "hi"}, "id": 1}),
        editor.clone(),
    )
    .await;
    assert_eq!(body["result"], json!("HI"));

    let body = send(
        &endpoint,
        json!({"jsonrpc": "2.0", "method": "owner", "id": 2}),
        editor,
    )
    .await;
    assert_eq!(body["result"], json!("ada"));
}

#[tokio::test]
async fn test_reader_denied() {
    init_tracing();
    let reader = CallerIdentity::authenticated("linus").with_role("reader");
    let body = send(
        &endpoint(),
        json!({"jsonrpc": "2.0", "method": "owner", "id": 7}),
        reader,
    )
    .await;
    assert_eq!(body["error"]["code"], json!(-32001));
    assert_eq!(body["id"], json!(7));
}

#[tokio::test]
async fn test_batch_through_umbrella() {
    init_tracing();
    let editor = CallerIdentity::authenticated("grace").with_role("editor");
    let body = send(
        &endpoint(),
        json!([
            {"jsonrpc": "2.0", "method": "shout", "params": ["a"], "id": 1},
            {"jsonrpc": "2.0", "method": "shout", "params": ["b"]},
            {"jsonrpc": "2.0", "method": "shout", "params": ["c"], "id": 3}
        ]),
        editor,
    )
    .await;
    assert_eq!(
        body,
        json!([
            {"jsonrpc": "2.0", "result": "A", "id": 1},
            {"jsonrpc": "2.0", "result": "C", "id": 3}
        ])
    );
}
