//! HTTP adapter built on warp
//!
//! Mounts an [`RpcEndpoint`] behind a warp filter. Every `POST` body is
//! handed to the endpoint with the request path as route. Calls producing no
//! body answer `204 No Content`.
//!
//! The caller identity is read from two headers set by a trusted front
//! proxy: [`USER_HEADER`] names an authenticated caller, [`ROLES_HEADER`]
//! lists comma-separated roles. Without a user header the caller is
//! anonymous. Put real authentication in front of this filter.
//!
//! When the endpoint's configuration enables compression and the client
//! sends `accept-encoding: gzip`, reply bodies are gzip-encoded.
//!
//! # Examples
//!
//! ```rust,no_run
//! use rpcflow::{http, RpcEndpoint};
//! use std::sync::Arc;
//!
//! # async fn example() -> rpcflow::Result<()> {
//! let endpoint = Arc::new(RpcEndpoint::builder().base_path("/rpc").build()?);
//! warp::serve(http::rpc_filter(endpoint))
//!     .run(([127, 0, 0, 1], 8080))
//!     .await;
//! # Ok(())
//! # }
//! ```

use flate2::write::GzEncoder;
use flate2::Compression;
use rpcflow_server::{CallerIdentity, InboundRequest, OutboundResponse, RpcEndpoint};
use std::convert::Infallible;
use std::io::Write;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::path::FullPath;
use warp::reply::{Reply, Response};
use warp::Filter;

/// Header naming an authenticated caller
pub const USER_HEADER: &str = "x-rpcflow-user";

/// Header listing the caller's roles, comma-separated
pub const ROLES_HEADER: &str = "x-rpcflow-roles";

/// Warp filter answering JSON-RPC `POST`s with `endpoint`
pub fn rpc_filter(
    endpoint: Arc<RpcEndpoint>,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    warp::post()
        .and(warp::path::full())
        .and(warp::header::optional::<String>(USER_HEADER))
        .and(warp::header::optional::<String>(ROLES_HEADER))
        .and(warp::header::optional::<String>("accept-encoding"))
        .and(warp::body::bytes())
        .and_then(
            move |path: FullPath,
                  user: Option<String>,
                  roles: Option<String>,
                  accept_encoding: Option<String>,
                  body: Bytes| {
                let endpoint = endpoint.clone();
                async move {
                    let request = InboundRequest::new(path.as_str(), body.to_vec())
                        .with_caller(identity(user, roles));
                    let reply = endpoint.handle(request).await;
                    let wants_gzip = accept_encoding.as_deref().is_some_and(accepts_gzip);
                    Ok::<_, Infallible>(into_reply(reply, wants_gzip))
                }
            },
        )
}

fn identity(user: Option<String>, roles: Option<String>) -> CallerIdentity {
    let Some(user) = user.filter(|u| !u.trim().is_empty()) else {
        return CallerIdentity::anonymous();
    };
    roles
        .iter()
        .flat_map(|roles| roles.split(','))
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .fold(CallerIdentity::authenticated(user.trim()), |caller, role| {
            caller.with_role(role)
        })
}

fn accepts_gzip(header: &str) -> bool {
    header.split(',').any(|coding| {
        let mut parts = coding.split(';').map(str::trim);
        let name = parts.next().unwrap_or_default();
        let refused = parts.any(|param| matches!(param, "q=0" | "q=0.0" | "q=0.00" | "q=0.000"));
        (name.eq_ignore_ascii_case("gzip") || name == "*") && !refused
    })
}

fn gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}

fn into_reply(response: Option<OutboundResponse>, wants_gzip: bool) -> Response {
    let Some(response) = response else {
        return warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT).into_response();
    };
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);

    if response.compress && wants_gzip {
        match gzip(&response.body) {
            Ok(compressed) => {
                let body = warp::reply::with_header(compressed, "content-type", response.content_type);
                let body = warp::reply::with_header(body, "content-encoding", "gzip");
                return warp::reply::with_status(body, status).into_response();
            }
            Err(e) => tracing::warn!(error = %e, "Gzip failed, replying uncompressed"),
        }
    }

    let body = warp::reply::with_header(response.body, "content-type", response.content_type);
    warp::reply::with_status(body, status).into_response()
}
