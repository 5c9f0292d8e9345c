/// Scoped variable store
///
/// Run-wide key/value state that units read and write through their
/// execution context. Three scopes exist: `global` and `execution` are flat
/// tables, `node` holds one table per unit id. Lookups that span scopes always
/// scan global, then execution, then the unit's node table, and the first
/// match wins.

use crate::expression;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{OnceLock, RwLock};
use thiserror::Error;

/// Declared type of a variable value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl VariableType {
    /// Whether `value` fits this declared type (`null` fits every type)
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (VariableType::Any, _) | (_, Value::Null) => true,
            (VariableType::String, Value::String(_)) => true,
            (VariableType::Number, Value::Number(_)) => true,
            (VariableType::Boolean, Value::Bool(_)) => true,
            (VariableType::Object, Value::Object(_)) => true,
            (VariableType::Array, Value::Array(_)) => true,
            _ => false,
        }
    }
}

/// Visibility scope of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableScope {
    Global,
    Execution,
    Node,
}

/// A named, typed value living in one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    pub scope: VariableScope,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub encrypted: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: Value, var_type: VariableType, scope: VariableScope) -> Self {
        Self {
            name: name.into(),
            value,
            var_type,
            scope,
            readonly: false,
            encrypted: false,
        }
    }

    /// Mark the variable as read-only
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Flag the value as sensitive
    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }
}

/// Errors raised by variable writes
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VariableError {
    #[error("node-scoped variable '{name}' requires a unit id")]
    MissingUnitId { name: String },

    #[error("variable '{name}' is read-only")]
    ReadOnly { name: String },

    #[error("variable '{name}' declared as {expected:?} cannot hold {actual}")]
    TypeMismatch {
        name: String,
        expected: VariableType,
        actual: String,
    },
}

/// Exported form of every table; also the store's internal layout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableSet {
    #[serde(default)]
    pub global: BTreeMap<String, Variable>,
    #[serde(default)]
    pub execution: BTreeMap<String, Variable>,
    #[serde(default)]
    pub node: BTreeMap<String, BTreeMap<String, Variable>>,
}

impl VariableSet {
    /// Tables to scan for `unit_id`, in lookup order
    fn lookup_tables<'a>(&'a self, unit_id: Option<&str>) -> Vec<&'a BTreeMap<String, Variable>> {
        let mut tables = vec![&self.global, &self.execution];
        if let Some(node) = unit_id.and_then(|id| self.node.get(id)) {
            tables.push(node);
        }
        tables
    }

    fn lookup(&self, name: &str, unit_id: Option<&str>) -> Option<&Variable> {
        self.lookup_tables(unit_id)
            .into_iter()
            .find_map(|table| table.get(name))
    }
}

/// Thread-safe scoped variable store
#[derive(Debug, Default)]
pub struct VariableStore {
    tables: RwLock<VariableSet>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or overwrite) a variable in a scope
    pub fn set_variable(
        &self,
        name: &str,
        value: Value,
        var_type: VariableType,
        scope: VariableScope,
        unit_id: Option<&str>,
    ) -> Result<(), VariableError> {
        self.define(Variable::new(name, value, var_type, scope), unit_id)
    }

    /// Store a fully described variable, flags included
    pub fn define(&self, variable: Variable, unit_id: Option<&str>) -> Result<(), VariableError> {
        if !variable.var_type.accepts(&variable.value) {
            return Err(VariableError::TypeMismatch {
                name: variable.name.clone(),
                expected: variable.var_type,
                actual: json_type_name(&variable.value).to_string(),
            });
        }

        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let table = match variable.scope {
            VariableScope::Global => &mut tables.global,
            VariableScope::Execution => &mut tables.execution,
            VariableScope::Node => {
                let unit_id = unit_id.ok_or_else(|| VariableError::MissingUnitId {
                    name: variable.name.clone(),
                })?;
                tables.node.entry(unit_id.to_string()).or_default()
            }
        };

        if table.get(&variable.name).is_some_and(|existing| existing.readonly) {
            return Err(VariableError::ReadOnly { name: variable.name });
        }

        tracing::debug!("📝 Set {:?} variable '{}'", variable.scope, variable.name);
        table.insert(variable.name.clone(), variable);
        Ok(())
    }

    /// Look up a variable in one scope
    pub fn get_variable(&self, name: &str, scope: VariableScope, unit_id: Option<&str>) -> Option<Variable> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        match scope {
            VariableScope::Global => tables.global.get(name).cloned(),
            VariableScope::Execution => tables.execution.get(name).cloned(),
            VariableScope::Node => unit_id
                .and_then(|id| tables.node.get(id))
                .and_then(|table| table.get(name))
                .cloned(),
        }
    }

    /// Look up a value across scopes: global, then execution, then node
    pub fn lookup(&self, name: &str, unit_id: Option<&str>) -> Option<Value> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables.lookup(name, unit_id).map(|variable| variable.value.clone())
    }

    /// Remove a variable; returns whether it existed
    pub fn delete_variable(&self, name: &str, scope: VariableScope, unit_id: Option<&str>) -> bool {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        match scope {
            VariableScope::Global => tables.global.remove(name).is_some(),
            VariableScope::Execution => tables.execution.remove(name).is_some(),
            VariableScope::Node => unit_id
                .and_then(|id| tables.node.get_mut(id))
                .is_some_and(|table| table.remove(name).is_some()),
        }
    }

    /// Drop every variable of a scope (all unit tables for `node`)
    pub fn clear_scope(&self, scope: VariableScope) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        match scope {
            VariableScope::Global => tables.global.clear(),
            VariableScope::Execution => tables.execution.clear(),
            VariableScope::Node => tables.node.clear(),
        }
    }

    pub fn clear_all(&self) {
        *self.tables.write().unwrap_or_else(|e| e.into_inner()) = VariableSet::default();
    }

    /// Every variable visible to `unit_id`: global, execution, then node
    ///
    /// Names are not de-duplicated across scopes.
    pub fn get_all_variables(&self, unit_id: Option<&str>) -> Vec<Variable> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables
            .lookup_tables(unit_id)
            .into_iter()
            .flat_map(|table| table.values().cloned())
            .collect()
    }

    /// Substitute `${name}` and `{{name}}` placeholders in `text`
    ///
    /// Names may carry a dotted path (`${user.address.city}`, `${items.0}`).
    /// Placeholders that do not resolve are left as written; non-string values
    /// are rendered as JSON.
    pub fn resolve_variables(&self, text: &str, unit_id: Option<&str>) -> String {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());

        placeholder_pattern()
            .replace_all(text, |caps: &Captures| {
                let path = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                let mut segments = path.split('.');
                let root = segments.next().unwrap_or_default();

                tables
                    .lookup(root, unit_id)
                    .and_then(|variable| walk_path(&variable.value, segments))
                    .map(expression::render)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Evaluate an expression with every visible variable bound by name
    ///
    /// Returns `null` when the expression fails to parse or evaluate.
    pub fn evaluate_expression(&self, expr: &str, unit_id: Option<&str>) -> Value {
        let bindings = self.bindings(unit_id);
        match expression::evaluate(expr, &bindings) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("⚠️ Expression '{}' evaluated to null: {}", expr, e);
                Value::Null
            }
        }
    }

    /// Name → value map for `unit_id`, first match across scopes wins
    pub fn bindings(&self, unit_id: Option<&str>) -> Map<String, Value> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let mut bindings = Map::new();
        for table in tables.lookup_tables(unit_id) {
            for (name, variable) in table {
                if !bindings.contains_key(name) {
                    bindings.insert(name.clone(), variable.value.clone());
                }
            }
        }
        bindings
    }

    /// Snapshot of every table
    pub fn export(&self) -> VariableSet {
        self.tables.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace every table with a previously exported snapshot
    pub fn import(&self, set: VariableSet) {
        tracing::info!(
            "📥 Imported variables: {} global, {} execution, {} node tables",
            set.global.len(),
            set.execution.len(),
            set.node.len()
        );
        *self.tables.write().unwrap_or_else(|e| e.into_inner()) = set;
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{\s*([A-Za-z_$][\w$]*(?:\.[\w$]+)*)\s*\}|\{\{\s*([A-Za-z_$][\w$]*(?:\.[\w$]+)*)\s*\}\}")
            .unwrap_or_else(|e| panic!("invalid placeholder pattern: {e}"))
    })
}

fn walk_path<'a, 'b>(value: &'a Value, segments: impl Iterator<Item = &'b str>) -> Option<&'a Value> {
    segments.fold(Some(value), |current, segment| match current? {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
