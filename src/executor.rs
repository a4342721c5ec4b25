//! Per-call execution pipeline
//!
//! The executor runs one resolved procedure through the full pipeline:
//! telemetry bracketing, before-hooks, input validation, the middleware
//! chain, the handler (inside a panic trap), conditional output validation,
//! and after-hooks. Errors are values; a panic escaping a handler is trapped
//! exactly once here and converted to `INTERNAL_ERROR`.
//!
//! Output validation is resolved per call, first match wins: the call's
//! [`CallOptions::validate_output`], then the procedure's
//! `meta.validate_output`, then [`CoreConfig::validate_output`].

use crate::config::CoreConfig;
use crate::context::Context;
use crate::error::{RpcError, RpcResult};
use crate::middleware::{ResolvedMiddleware, execute_chain};
use crate::procedure::ProcedureDef;
use crate::registry::Procedures;
use crate::schema::{ParseMode, errors_to_details};
use crate::telemetry::{TelemetryEvent, TelemetrySink, events};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Hook run before validation; may replace the context or abort the call.
pub type BeforeHook = Arc<
    dyn Fn(
            Context,
            serde_json::Value,
            Arc<ProcedureDef>,
        ) -> Pin<Box<dyn Future<Output = RpcResult<Context>> + Send>>
        + Send
        + Sync,
>;

/// Hook run after the handler; may replace the value or abort the call.
pub type AfterHook = Arc<
    dyn Fn(
            Context,
            serde_json::Value,
            Arc<ProcedureDef>,
        ) -> Pin<Box<dyn Future<Output = RpcResult<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

/// Per-call options accepted by `Router::call_with` and `Router::batch_with`.
#[derive(Clone, Default)]
pub struct CallOptions {
    /// Hooks run before input validation, in order; the first error aborts
    pub before_hooks: Vec<BeforeHook>,
    /// Hooks run after the handler, in order; the first error aborts
    pub after_hooks: Vec<AfterHook>,
    /// Per-call override of the output-validation setting
    pub validate_output: Option<bool>,
}

impl CallOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a before-hook.
    #[must_use = "This method returns a new CallOptions and does not modify self"]
    pub fn before_hook<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Context, serde_json::Value, Arc<ProcedureDef>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Context>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.before_hooks.push(Arc::new(move |ctx, input, def| {
            Box::pin(f(ctx, input, def))
        }));
        self
    }

    /// Append an after-hook.
    #[must_use = "This method returns a new CallOptions and does not modify self"]
    pub fn after_hook<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Context, serde_json::Value, Arc<ProcedureDef>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<serde_json::Value>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.after_hooks.push(Arc::new(move |ctx, value, def| {
            Box::pin(f(ctx, value, def))
        }));
        self
    }

    /// Override the output-validation setting for this call.
    #[must_use = "This method returns a new CallOptions and does not modify self"]
    pub fn validate_output(mut self, enabled: bool) -> Self {
        self.validate_output = Some(enabled);
        self
    }
}

impl std::fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOptions")
            .field("before_hooks", &self.before_hooks.len())
            .field("after_hooks", &self.after_hooks.len())
            .field("validate_output", &self.validate_output)
            .finish()
    }
}

/// Resolve the effective output-validation setting, first match wins:
/// per-call override, procedure meta, process-wide default.
pub(crate) fn effective_validate_output(
    opts: &CallOptions,
    def: &ProcedureDef,
    config: &CoreConfig,
) -> bool {
    opts.validate_output
        .or(def.meta().validate_output)
        .unwrap_or(config.validate_output)
}

/// Run one procedure through the execution pipeline.
pub(crate) async fn execute(
    unit: &Arc<Procedures>,
    def: &Arc<ProcedureDef>,
    chain: Arc<[ResolvedMiddleware]>,
    raw_input: serde_json::Value,
    ctx: Context,
    opts: &CallOptions,
    config: &CoreConfig,
    telemetry: &Arc<dyn TelemetrySink>,
) -> RpcResult<serde_json::Value> {
    telemetry.emit(
        TelemetryEvent::new(events::PROCEDURE_START)
            .with_system_time()
            .meta("procedure", def.name())
            .meta("kind", def.kind().to_string())
            .meta("unit", unit.unit()),
    );
    let started = Instant::now();

    let result = run_pipeline(unit, def, chain, raw_input, ctx, opts, config).await;

    let duration = started.elapsed();
    match &result {
        Ok(_) => telemetry.emit(
            TelemetryEvent::new(events::PROCEDURE_STOP)
                .with_duration(duration)
                .meta("procedure", def.name())
                .meta("kind", def.kind().to_string())
                .meta("unit", unit.unit()),
        ),
        Err(e) => telemetry.emit(
            TelemetryEvent::new(events::PROCEDURE_EXCEPTION)
                .with_duration(duration)
                .meta("procedure", def.name())
                .meta("kind", def.kind().to_string())
                .meta("unit", unit.unit())
                .meta("error_kind", e.code.as_str().to_string())
                .meta("reason", e.message.clone()),
        ),
    }

    result
}

async fn run_pipeline(
    unit: &Arc<Procedures>,
    def: &Arc<ProcedureDef>,
    chain: Arc<[ResolvedMiddleware]>,
    raw_input: serde_json::Value,
    mut ctx: Context,
    opts: &CallOptions,
    config: &CoreConfig,
) -> RpcResult<serde_json::Value> {
    for hook in &opts.before_hooks {
        ctx = hook(ctx, raw_input.clone(), def.clone()).await?;
    }

    // A procedure without an input schema receives the empty mapping.
    let typed_input = match def.input() {
        None => serde_json::Value::Object(serde_json::Map::new()),
        Some(schema) => schema
            .parse(&raw_input, ParseMode::Coerce)
            .map_err(|errors| {
                debug!(
                    procedure = def.name(),
                    error_count = errors.len(),
                    "Input validation failed"
                );
                RpcError::validation("Validation failed").with_details(errors_to_details(&errors))
            })?,
    };

    let ctx = execute_chain(chain, ctx).await?;

    let handler = unit.handler_for(def).ok_or_else(|| {
        RpcError::internal(format!("No handler bound for procedure '{}'", def.name()))
    })?;

    let outcome = AssertUnwindSafe(handler(typed_input, ctx.clone()))
        .catch_unwind()
        .await;

    let mut value = match outcome {
        Ok(result) => result?,
        Err(payload) => {
            let reason = panic_message(payload);
            error!(
                procedure = def.name(),
                unit = unit.unit(),
                panic = %reason,
                "Handler panicked"
            );
            let mut err = RpcError::internal("Internal server error");
            if config.include_exception_details {
                err = err.with_details(serde_json::json!({"panic": reason}));
            }
            return Err(err);
        }
    };

    if effective_validate_output(opts, def, config)
        && let Some(schema) = def.output()
    {
        match schema.parse(&value, ParseMode::Strict) {
            Ok(typed) => value = typed,
            Err(errors) => {
                error!(
                    procedure = def.name(),
                    unit = unit.unit(),
                    details = %errors_to_details(&errors),
                    "Response validation failed"
                );
                // The mismatch report describes the internal response shape;
                // it is logged above and never attached to the payload,
                // regardless of include_exception_details.
                return Err(RpcError::internal("Response validation failed"));
            }
        }
    }

    for hook in &opts.after_hooks {
        value = hook(ctx.clone(), value, def.clone()).await?;
    }

    Ok(value)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::Procedure;
    use crate::procedure::ProcedureMeta;
    use crate::schema::{FieldSchema, ObjectSchema};
    use crate::telemetry::CaptureSink;
    use serde_json::json;

    fn unit_of(procedure: Procedure) -> Arc<Procedures> {
        Arc::new(
            Procedures::builder("test")
                .procedure(procedure)
                .build()
                .unwrap(),
        )
    }

    fn empty_chain() -> Arc<[ResolvedMiddleware]> {
        Vec::new().into()
    }

    async fn run(
        unit: &Arc<Procedures>,
        name: &str,
        input: serde_json::Value,
        opts: &CallOptions,
        config: &CoreConfig,
    ) -> RpcResult<serde_json::Value> {
        let def = unit.get(name).unwrap().clone();
        let sink: Arc<dyn TelemetrySink> = Arc::new(crate::telemetry::NullSink);
        execute(
            unit,
            &def,
            empty_chain(),
            input,
            Context::detached(),
            opts,
            config,
            &sink,
        )
        .await
    }

    #[test]
    fn test_validate_output_precedence() {
        let config_on = CoreConfig::new().with_validate_output(true);
        let config_off = CoreConfig::new().with_validate_output(false);

        let (plain, _) = Procedure::query("p").into_def();
        let (meta_off, _) = Procedure::query("p")
            .meta(ProcedureMeta::new().validate_output(false))
            .into_def();
        let (meta_on, _) = Procedure::query("p")
            .meta(ProcedureMeta::new().validate_output(true))
            .into_def();

        // Config default applies when nothing overrides.
        assert!(effective_validate_output(&CallOptions::new(), &plain, &config_on));
        assert!(!effective_validate_output(&CallOptions::new(), &plain, &config_off));

        // Procedure meta beats the config.
        assert!(!effective_validate_output(&CallOptions::new(), &meta_off, &config_on));
        assert!(effective_validate_output(&CallOptions::new(), &meta_on, &config_off));

        // The per-call override beats both.
        let call_on = CallOptions::new().validate_output(true);
        let call_off = CallOptions::new().validate_output(false);
        assert!(effective_validate_output(&call_on, &meta_off, &config_off));
        assert!(!effective_validate_output(&call_off, &meta_on, &config_on));
    }

    #[tokio::test]
    async fn test_null_input_schema_substitutes_empty_mapping() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen2 = seen.clone();
        let unit = unit_of(Procedure::query("probe").handler_raw(Arc::new(
            move |input, _ctx| {
                let seen = seen2.clone();
                Box::pin(async move {
                    *seen.lock().unwrap() = Some(input);
                    Ok(json!(null))
                })
            },
        )));

        run(&unit, "probe", json!("ignored"), &CallOptions::new(), &CoreConfig::default())
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(json!({})));
    }

    #[tokio::test]
    async fn test_input_validation_failure_shape() {
        let unit = unit_of(
            Procedure::query("get")
                .input(ObjectSchema::new().field("id", FieldSchema::string()))
                .handler_raw(Arc::new(|_input, _ctx| {
                    Box::pin(async move { Ok(json!(null)) })
                })),
        );

        let err = run(&unit, "get", json!({}), &CallOptions::new(), &CoreConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code.as_str(), "VALIDATION_ERROR");
        assert_eq!(err.message, "Validation failed");
        assert_eq!(err.details.unwrap()["id"][0], "id is required");
    }

    #[tokio::test]
    async fn test_panic_is_trapped() {
        let unit = unit_of(Procedure::query("boom").handler_raw(Arc::new(|_input, _ctx| {
            Box::pin(async move { panic!("kaboom: {}", 7) })
        })));

        let err = run(&unit, "boom", json!({}), &CallOptions::new(), &CoreConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code.as_str(), "INTERNAL_ERROR");
        assert_eq!(err.message, "Internal server error");
        // Details stay hidden unless explicitly enabled.
        assert!(err.details.is_none());
    }

    #[tokio::test]
    async fn test_panic_details_gated_by_config() {
        let unit = unit_of(Procedure::query("boom").handler_raw(Arc::new(|_input, _ctx| {
            Box::pin(async move { panic!("secret detail") })
        })));

        let config = CoreConfig::new().with_include_exception_details(true);
        let err = run(&unit, "boom", json!({}), &CallOptions::new(), &config)
            .await
            .unwrap_err();
        assert_eq!(err.details.unwrap()["panic"], "secret detail");
    }

    #[tokio::test]
    async fn test_output_validation_failure_does_not_leak() {
        let unit = unit_of(
            Procedure::query("get")
                .output(ObjectSchema::new().field("id", FieldSchema::string()))
                .handler_raw(Arc::new(|_input, _ctx| {
                    Box::pin(async move { Ok(json!({"wrong": true})) })
                })),
        );

        let err = run(&unit, "get", json!({}), &CallOptions::new(), &CoreConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code.as_str(), "INTERNAL_ERROR");
        assert_eq!(err.message, "Response validation failed");
        assert!(err.details.is_none());
    }

    #[tokio::test]
    async fn test_output_validation_details_withheld_even_with_exception_details() {
        // Unlike panic payloads, the schema mismatch report is never
        // attached, whatever include_exception_details says.
        let unit = unit_of(
            Procedure::query("get")
                .output(ObjectSchema::new().field("id", FieldSchema::string()))
                .handler_raw(Arc::new(|_input, _ctx| {
                    Box::pin(async move { Ok(json!({"wrong": true})) })
                })),
        );

        let config = CoreConfig::new().with_include_exception_details(true);
        let err = run(&unit, "get", json!({}), &CallOptions::new(), &config)
            .await
            .unwrap_err();
        assert_eq!(err.code.as_str(), "INTERNAL_ERROR");
        assert_eq!(err.message, "Response validation failed");
        assert!(err.details.is_none());
    }

    #[tokio::test]
    async fn test_output_validation_disabled_by_meta() {
        let unit = unit_of(
            Procedure::query("get")
                .meta(ProcedureMeta::new().validate_output(false))
                .output(ObjectSchema::new().field("id", FieldSchema::string()))
                .handler_raw(Arc::new(|_input, _ctx| {
                    Box::pin(async move { Ok(json!({"wrong": true})) })
                })),
        );

        let out = run(&unit, "get", json!({}), &CallOptions::new(), &CoreConfig::default())
            .await
            .unwrap();
        assert_eq!(out, json!({"wrong": true}));
    }

    #[tokio::test]
    async fn test_hooks_run_in_order_and_short_circuit() {
        let unit = unit_of(Procedure::query("get").handler_raw(Arc::new(|_input, ctx| {
            Box::pin(async move {
                Ok(json!({"user": ctx.get_assign("user").cloned().unwrap_or(json!(null))}))
            })
        })));

        let opts = CallOptions::new()
            .before_hook(|ctx: Context, _input, _def| async move {
                Ok(ctx.assign("user", json!("alice")))
            })
            .after_hook(|_ctx, mut value: serde_json::Value, _def| async move {
                value["stamped"] = json!(true);
                Ok(value)
            });

        let out = run(&unit, "get", json!({}), &opts, &CoreConfig::default())
            .await
            .unwrap();
        assert_eq!(out["user"], "alice");
        assert_eq!(out["stamped"], true);

        let failing = CallOptions::new().before_hook(|_ctx, _input, _def| async move {
            Err(RpcError::custom("HOOK_DENIED", "no"))
        });
        let err = run(&unit, "get", json!({}), &failing, &CoreConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code.as_str(), "HOOK_DENIED");
    }

    #[tokio::test]
    async fn test_handler_domain_error_passes_through() {
        let unit = unit_of(Procedure::mutation("charge").handler_raw(Arc::new(
            |_input, _ctx| {
                Box::pin(async move {
                    Err(RpcError::custom("INSUFFICIENT_FUNDS", "Balance too low")
                        .with_details(json!({"balance": 3})))
                })
            },
        )));

        let err = run(&unit, "charge", json!({}), &CallOptions::new(), &CoreConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code.as_str(), "INSUFFICIENT_FUNDS");
        assert_eq!(err.details.unwrap()["balance"], 3);
    }

    #[tokio::test]
    async fn test_telemetry_bracketing() {
        let unit = unit_of(Procedure::query("ok").handler_raw(Arc::new(|_input, _ctx| {
            Box::pin(async move { Ok(json!(1)) })
        })));
        let def = unit.get("ok").unwrap().clone();
        let capture = Arc::new(CaptureSink::new());
        let sink: Arc<dyn TelemetrySink> = capture.clone();

        execute(
            &unit,
            &def,
            empty_chain(),
            json!({}),
            Context::detached(),
            &CallOptions::new(),
            &CoreConfig::default(),
            &sink,
        )
        .await
        .unwrap();

        assert_eq!(capture.names(), vec![events::PROCEDURE_START, events::PROCEDURE_STOP]);
        let events = capture.events();
        assert!(events[0].measurements.contains_key("system_time"));
        assert_eq!(events[0].metadata["procedure"], "ok");
        assert_eq!(events[0].metadata["kind"], "query");
        assert_eq!(events[0].metadata["unit"], "test");
        assert!(events[1].measurements.contains_key("duration"));
    }

    #[tokio::test]
    async fn test_telemetry_exception_event() {
        let unit = unit_of(Procedure::query("bad").handler_raw(Arc::new(|_input, _ctx| {
            Box::pin(async move { Err(RpcError::custom("DENIED", "nope")) })
        })));
        let def = unit.get("bad").unwrap().clone();
        let capture = Arc::new(CaptureSink::new());
        let sink: Arc<dyn TelemetrySink> = capture.clone();

        let _ = execute(
            &unit,
            &def,
            empty_chain(),
            json!({}),
            Context::detached(),
            &CallOptions::new(),
            &CoreConfig::default(),
            &sink,
        )
        .await;

        assert_eq!(
            capture.names(),
            vec![events::PROCEDURE_START, events::PROCEDURE_EXCEPTION]
        );
        let exception = &capture.events()[1];
        assert_eq!(exception.metadata["error_kind"], "DENIED");
        assert_eq!(exception.metadata["reason"], "nope");
    }
}
