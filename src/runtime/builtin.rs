/// Built-in control executors
///
/// Generic unit kinds that need no external resources:
/// - `trigger`: entry point, passes the run input through (or its `payload`)
/// - `set`: merges templated `values` into the input object
/// - `condition`: evaluates `expression` and labels the output `true`/`false`
/// - `variable`: writes or reads one variable in the shared store
/// - `delay`: sleeps `ms` milliseconds, then passes the input through
///
/// Expressions see every visible variable by name plus the unit input as `data`.

use crate::error::EngineResult;
use crate::expression::{self, truthy};
use crate::runtime::engine::ExecutionEngine;
use crate::runtime::executor::{UnitExecutor, UnitOutput};
use crate::variables::{VariableScope, VariableType};
use crate::workflow::types::ExecutionContext;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Register every built-in kind on `engine`
pub fn register_builtins(engine: &ExecutionEngine) -> EngineResult<()> {
    engine.register_executor("trigger", Arc::new(TriggerExecutor))?;
    engine.register_executor("set", Arc::new(SetExecutor))?;
    engine.register_executor("condition", Arc::new(ConditionExecutor))?;
    engine.register_executor("variable", Arc::new(VariableExecutor))?;
    engine.register_executor("delay", Arc::new(DelayExecutor))?;
    Ok(())
}

/// Bindings for expressions evaluated inside a unit
fn expression_bindings(ctx: &ExecutionContext) -> Map<String, Value> {
    let mut bindings = ctx.variables.bindings(Some(&ctx.unit_id));
    bindings.insert("data".to_string(), ctx.data.clone());
    bindings
}

/// Replace placeholders in every string nested inside `value`
fn resolve_templates(value: &Value, ctx: &ExecutionContext) -> Value {
    match value {
        Value::String(text) => Value::String(ctx.variables.resolve_variables(text, Some(&ctx.unit_id))),
        Value::Array(items) => Value::Array(items.iter().map(|item| resolve_templates(item, ctx)).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, item)| (key.clone(), resolve_templates(item, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[derive(Debug)]
pub struct TriggerExecutor;

#[async_trait]
impl UnitExecutor for TriggerExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<UnitOutput> {
        tracing::debug!("🎬 Trigger '{}' fired", ctx.unit_id);
        match ctx.config.get("payload") {
            Some(payload) if ctx.data.is_null() => Ok(UnitOutput::new(payload.clone())),
            _ => Ok(UnitOutput::new(ctx.data.clone())),
        }
    }
}

#[derive(Debug)]
pub struct SetExecutor;

#[async_trait]
impl UnitExecutor for SetExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<UnitOutput> {
        let values = ctx
            .config
            .get("values")
            .and_then(Value::as_object)
            .ok_or_else(|| anyhow!("invalid config: 'set' requires a 'values' object"))?;

        let mut output = match &ctx.data {
            Value::Object(fields) => fields.clone(),
            Value::Null => Map::new(),
            other => {
                let mut wrapped = Map::new();
                wrapped.insert("input".to_string(), other.clone());
                wrapped
            }
        };
        for (key, value) in values {
            output.insert(key.clone(), resolve_templates(value, ctx));
        }

        tracing::debug!("✏️ Set {} fields on '{}'", values.len(), ctx.unit_id);
        Ok(UnitOutput::new(Value::Object(output)))
    }
}

#[derive(Debug)]
pub struct ConditionExecutor;

#[async_trait]
impl UnitExecutor for ConditionExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<UnitOutput> {
        let source = ctx
            .config_str("expression")
            .ok_or_else(|| anyhow!("invalid config: 'condition' requires an 'expression'"))?;

        let value = expression::evaluate(source, &expression_bindings(ctx))
            .with_context(|| format!("invalid expression '{}'", source))?;
        let branch = if truthy(&value) { "true" } else { "false" };

        tracing::debug!("🔀 Condition '{}' on '{}' took branch {}", source, ctx.unit_id, branch);
        Ok(UnitOutput::with_branch(ctx.data.clone(), branch))
    }
}

/// Writes a variable when `value` or `expression` is configured, reads it otherwise
///
/// Config: `name`, optional `scope` (default `execution`), optional `type`
/// (default `any`). A write passes the input through; a read outputs the
/// current value or `null`.
#[derive(Debug)]
pub struct VariableExecutor;

#[async_trait]
impl UnitExecutor for VariableExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<UnitOutput> {
        let name = ctx
            .config_str("name")
            .ok_or_else(|| anyhow!("invalid config: 'variable' requires a 'name'"))?;
        let scope: VariableScope = match ctx.config.get("scope") {
            Some(scope) => serde_json::from_value(scope.clone()).context("invalid variable scope")?,
            None => VariableScope::Execution,
        };
        let var_type: VariableType = match ctx.config.get("type") {
            Some(var_type) => serde_json::from_value(var_type.clone()).context("invalid variable type")?,
            None => VariableType::Any,
        };

        let value = match (ctx.config.get("value"), ctx.config_str("expression")) {
            (Some(value), _) => Some(resolve_templates(value, ctx)),
            (None, Some(source)) => Some(
                expression::evaluate(source, &expression_bindings(ctx))
                    .with_context(|| format!("invalid expression '{}'", source))?,
            ),
            (None, None) => None,
        };

        let Some(value) = value else {
            let current = ctx
                .variables
                .get_variable(name, scope, Some(&ctx.unit_id))
                .map(|variable| variable.value)
                .unwrap_or(Value::Null);
            return Ok(UnitOutput::new(current));
        };

        ctx.variables
            .set_variable(name, value, var_type, scope, Some(&ctx.unit_id))
            .map_err(|e| anyhow!("invalid variable write: {}", e))?;
        tracing::debug!("📦 '{}' stored {:?} variable '{}'", ctx.unit_id, scope, name);
        Ok(UnitOutput::new(ctx.data.clone()))
    }

    fn cacheable(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct DelayExecutor;

#[async_trait]
impl UnitExecutor for DelayExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<UnitOutput> {
        let ms = ctx.config.get("ms").and_then(Value::as_u64).unwrap_or(0);
        tracing::debug!("⏳ '{}' waiting {}ms", ctx.unit_id, ms);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(UnitOutput::new(ctx.data.clone()))
    }

    fn cacheable(&self) -> bool {
        false
    }
}
