//! Integration tests for the dispatch engine.

mod batch_tests;

use crate::schema::{FieldSchema, ObjectSchema};
use crate::subscription::SubscriptionToken;
use crate::{Context, Procedure, Procedures, Router, RpcError, RpcResult};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct GetUserInput {
    id: String,
}

async fn get_user(input: GetUserInput, _ctx: Context) -> RpcResult<serde_json::Value> {
    Ok(json!({"id": input.id, "name": "Alice"}))
}

async fn list_users(_input: serde_json::Value, _ctx: Context) -> RpcResult<serde_json::Value> {
    Ok(json!([{"id": "1"}, {"id": "2"}]))
}

/// The standard fixture unit: users.{get,list,create,changes}.
pub(crate) fn users_unit() -> Procedures {
    Procedures::builder("users")
        .procedure(
            Procedure::query("get")
                .input(ObjectSchema::new().field("id", FieldSchema::string()))
                .handler(get_user),
        )
        .procedure(Procedure::query("list").handler(list_users))
        .procedure(
            Procedure::mutation("create")
                .input(
                    ObjectSchema::new()
                        .field("name", FieldSchema::string().min_len(2))
                        .field("email", FieldSchema::string().email()),
                )
                .handler(|input: serde_json::Value, _ctx: Context| async move {
                    Ok(json!({"created": input["name"]}))
                }),
        )
        .procedure(
            Procedure::subscription("changes").handler(
                |_input: serde_json::Value, _ctx: Context| async move {
                    Ok(SubscriptionToken::new())
                },
            ),
        )
        .build()
        .unwrap()
}

/// A router with just the users unit mounted.
pub(crate) fn users_router() -> Router {
    Router::builder().mount("users", users_unit()).build().unwrap()
}

/// A handler that echoes back the error code it is asked for.
pub(crate) fn failing_unit() -> Procedures {
    Procedures::builder("failing")
        .procedure(Procedure::query("denied").handler(
            |_input: serde_json::Value, _ctx: Context| async move {
                Err::<serde_json::Value, _>(RpcError::custom("DENIED", "Access denied"))
            },
        ))
        .build()
        .unwrap()
}
