//! Registry RPC handlers

use crate::registry::LocationRegistry;
use codec::error_code::{ERR_LOCATION_NOT_FOUND, ERR_SUCCESS};
use codec::location::*;
use codec::Response;
use network::MessageDispatcher;
use std::time::Duration;
use types::ActorId;

fn code<T>(result: crate::Result<T>) -> i32 {
    result.err().map_or(ERR_SUCCESS, |e| e.code())
}

/// Serve the five registry operations from `registry`
pub fn register_handlers(registry: &LocationRegistry, dispatcher: &mut MessageDispatcher) -> network::Result<()> {
    let r = registry.clone();
    dispatcher.register_rpc(move |_, request: ObjectAddRequest| {
        let registry = r.clone();
        async move {
            let result = registry
                .add(request.location_type, request.key, request.actor_id)
                .await;
            ObjectAddResponse::with_error(code(result))
        }
    })?;

    let r = registry.clone();
    dispatcher.register_rpc(move |_, request: ObjectGetRequest| {
        let registry = r.clone();
        async move {
            match registry.get(request.location_type, request.key) {
                Some(actor_id) => ObjectGetResponse {
                    error: ERR_SUCCESS,
                    actor_id,
                },
                None => ObjectGetResponse {
                    error: ERR_LOCATION_NOT_FOUND,
                    actor_id: ActorId::NONE,
                },
            }
        }
    })?;

    let r = registry.clone();
    dispatcher.register_rpc(move |_, request: ObjectLockRequest| {
        let registry = r.clone();
        async move {
            let time = Duration::from_millis(u64::from(request.time_ms));
            let result = registry
                .lock(request.location_type, request.key, request.actor_id, time)
                .await;
            ObjectLockResponse::with_error(code(result))
        }
    })?;

    let r = registry.clone();
    dispatcher.register_rpc(move |_, request: ObjectUnLockRequest| {
        let registry = r.clone();
        async move {
            let result = registry.unlock(
                request.location_type,
                request.key,
                request.old_actor_id,
                request.new_actor_id,
            );
            ObjectUnLockResponse::with_error(code(result))
        }
    })?;

    let r = registry.clone();
    dispatcher.register_rpc(move |_, request: ObjectRemoveRequest| {
        let registry = r.clone();
        async move {
            let result = registry.remove(request.location_type, request.key).await;
            ObjectRemoveResponse::with_error(code(result))
        }
    })?;

    Ok(())
}
