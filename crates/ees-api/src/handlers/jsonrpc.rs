//! JSON-RPC 2.0 endpoint
//!
//! Every call answers HTTP 200; failures travel in the `error` member as the
//! error message, the way the rating engine clients expect them.

use crate::dto::common::OK;
use crate::dto::jsonrpc::methods;
use crate::dto::requests::validated;
use crate::dto::{ReplayFailedPostsRequest, ResetMetricsRequest, RpcRequest, RpcResponse};
use actix_web::{web, HttpResponse};
use ees_core::models::{CgrEventWithEeIds, ReplayFailedPostsArgs, ResetMetricsArgs};
use ees_core::{EesError, EesResult, ExportContext};
use ees_services::EventExporterService;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::RequestContext;

/// POST /jsonrpc
#[instrument(skip(service, req), fields(method = %req.method))]
pub async fn dispatch(
    service: web::Data<EventExporterService>,
    req: web::Json<RpcRequest>,
) -> HttpResponse {
    let RpcRequest { method, params, id, .. } = req.into_inner();
    debug!("JSON-RPC call");

    let request = RequestContext::new();
    let response = match call(&service, request.ctx(), &method, params).await {
        Ok(result) => RpcResponse::ok(id, result),
        Err(e) => {
            warn!("JSON-RPC call {} failed: {}", method, e);
            RpcResponse::err(id, &e)
        }
    };
    HttpResponse::Ok().json(response)
}

async fn call(
    service: &EventExporterService,
    ctx: &ExportContext,
    method: &str,
    params: Vec<Value>,
) -> EesResult<Value> {
    match method {
        methods::PING => Ok(json!("Pong")),
        methods::PROCESS_EVENT => {
            let args: CgrEventWithEeIds = first_param(params)?;
            let reply = service.process_event(ctx, args).await?;
            Ok(serde_json::to_value(reply)?)
        }
        methods::RESET_EXPORTER_METRICS => {
            let args: ResetMetricsArgs = validated(first_param::<ResetMetricsRequest>(params)?)?;
            service.reset_exporter_metrics(&args).await?;
            Ok(json!(OK))
        }
        methods::REPLAY_FAILED_POSTS => {
            let args: ReplayFailedPostsArgs = validated(first_param::<ReplayFailedPostsRequest>(params)?)?;
            service.replay_failed_posts(ctx, &args).await?;
            Ok(json!(OK))
        }
        other => Err(EesError::Validation(format!("rpc: can't find method {}", other))),
    }
}

fn first_param<T: DeserializeOwned>(params: Vec<Value>) -> EesResult<T> {
    let param = params
        .into_iter()
        .next()
        .ok_or_else(|| EesError::Validation("MANDATORY_IE_MISSING: [params]".to_string()))?;
    Ok(serde_json::from_value(param)?)
}

/// Configure the JSON-RPC route
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/jsonrpc", web::post().to(dispatch));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_param() {
        let args: ResetMetricsRequest =
            first_param(vec![json!({"ID": "csv1"}), json!("ignored")]).unwrap();
        assert_eq!(args.id, "csv1");

        let err = first_param::<ResetMetricsRequest>(Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "MANDATORY_IE_MISSING: [params]");
    }
}
