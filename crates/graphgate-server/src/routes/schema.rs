//! Schema introspection and validation endpoints.

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::models::{SchemaStats, SchemaValidationRequest, SchemaValidationResponse};
use crate::state::{AppState, ResolveError};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use graphgate_core::GraphId;
use serde_json::{json, Value};
use std::collections::HashSet;

const OPERATION_NAME: &str = "schema_info";

/// `GET /v1/graphs/{graph_id}/schema/info`: runtime introspection of the
/// live database structure via catalog queries.
pub async fn schema_info(
    State(state): State<AppState>,
    Path(graph_id): Path<String>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Response, ApiError> {
    let graph = GraphId::parse(&graph_id)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state.breakers().check(graph.as_str(), OPERATION_NAME)?;

    let repository = state
        .repositories()
        .resolve(&graph, &user)
        .await
        .map_err(|err| match err {
            ResolveError::AccessDenied(_) => ApiError::Forbidden(err.to_string()),
            ResolveError::NotFound(_) => ApiError::NotFound(err.to_string()),
        })?;

    match repository.schema_info().await {
        Ok(info) => {
            state.breakers().record_success(graph.as_str(), OPERATION_NAME);
            Ok(Json(json!({
                "graph_id": graph.as_str(),
                "node_labels": info.node_labels,
                "relationship_types": info.relationship_types,
                "node_properties": info.node_properties,
                "timestamp": Utc::now().to_rfc3339(),
            }))
            .into_response())
        }
        Err(err) => {
            state.breakers().record_failure(graph.as_str(), OPERATION_NAME);
            tracing::error!(graph_id = %graph, error = %err, "schema introspection failed");
            Err(ApiError::Internal(err.to_string()))
        }
    }
}

/// `POST /v1/graphs/{graph_id}/schema/validate`: validates a JSON or YAML
/// schema document without touching the database.
pub async fn validate_schema(
    State(_state): State<AppState>,
    Path(_graph_id): Path<String>,
    AuthenticatedUser(_user): AuthenticatedUser,
    Json(request): Json<SchemaValidationRequest>,
) -> Result<Response, ApiError> {
    let document = parse_schema_document(&request)?;
    let report = validate_document(&document);
    Ok(Json(report).into_response())
}

fn parse_schema_document(request: &SchemaValidationRequest) -> Result<Value, ApiError> {
    match &request.schema {
        Value::String(raw) => {
            let format = request.format.as_deref().unwrap_or("json");
            match format {
                "yaml" => serde_yaml::from_str(raw)
                    .map_err(|e| ApiError::BadRequest(format!("invalid YAML schema: {e}"))),
                "json" => serde_json::from_str(raw)
                    .map_err(|e| ApiError::BadRequest(format!("invalid JSON schema: {e}"))),
                other => Err(ApiError::BadRequest(format!(
                    "unknown schema format {other:?}, expected json or yaml"
                ))),
            }
        }
        value @ Value::Object(_) => Ok(value.clone()),
        _ => Err(ApiError::BadRequest(
            "schema must be an object or a JSON/YAML string".into(),
        )),
    }
}

const ALLOWED_PROPERTY_TYPES: &[&str] = &[
    "STRING", "INT64", "INT32", "DOUBLE", "FLOAT", "BOOLEAN", "DATE", "TIMESTAMP", "BLOB", "UUID",
];

fn validate_document(document: &Value) -> SchemaValidationResponse {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut stats = SchemaStats::default();

    let Some(object) = document.as_object() else {
        return SchemaValidationResponse {
            valid: false,
            errors: vec!["schema document must be an object".into()],
            warnings,
            stats,
        };
    };

    let mut node_labels: HashSet<String> = HashSet::new();

    match object.get("nodes").and_then(Value::as_array) {
        Some(nodes) => {
            stats.node_count = nodes.len();
            for (index, node) in nodes.iter().enumerate() {
                validate_node(
                    node,
                    index,
                    &mut errors,
                    &mut warnings,
                    &mut node_labels,
                    &mut stats,
                );
            }
        }
        None => errors.push("schema must contain a 'nodes' array".into()),
    }

    if let Some(relationships) = object.get("relationships").and_then(Value::as_array) {
        stats.relationship_count = relationships.len();
        for (index, relationship) in relationships.iter().enumerate() {
            validate_relationship(relationship, index, &node_labels, &mut errors, &mut warnings);
        }
    }

    SchemaValidationResponse {
        valid: errors.is_empty(),
        errors,
        warnings,
        stats,
    }
}

fn validate_node(
    node: &Value,
    index: usize,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
    node_labels: &mut HashSet<String>,
    stats: &mut SchemaStats,
) {
    let Some(node) = node.as_object() else {
        errors.push(format!("nodes[{index}] must be an object"));
        return;
    };

    let Some(label) = node.get("label").and_then(Value::as_str) else {
        errors.push(format!("nodes[{index}] is missing a 'label'"));
        return;
    };

    if !node_labels.insert(label.to_string()) {
        errors.push(format!("duplicate node label '{label}'"));
    }
    if !label.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
        warnings.push(format!(
            "node label '{label}' should be UpperCamelCase by convention"
        ));
    }

    let Some(properties) = node.get("properties").and_then(Value::as_array) else {
        errors.push(format!("node '{label}' is missing a 'properties' array"));
        return;
    };
    stats.property_count += properties.len();

    let mut has_primary_key = false;
    let mut seen: HashSet<&str> = HashSet::new();
    for property in properties {
        let Some(property) = property.as_object() else {
            errors.push(format!("node '{label}' has a non-object property"));
            continue;
        };
        let Some(name) = property.get("name").and_then(Value::as_str) else {
            errors.push(format!("node '{label}' has a property without a name"));
            continue;
        };
        if !seen.insert(name) {
            errors.push(format!("node '{label}' has duplicate property '{name}'"));
        }
        if name
            .chars()
            .any(|c| c.is_ascii_uppercase())
        {
            warnings.push(format!(
                "property '{label}.{name}' should be snake_case by convention"
            ));
        }
        match property.get("type").and_then(Value::as_str) {
            Some(ty) if ALLOWED_PROPERTY_TYPES.contains(&ty.to_ascii_uppercase().as_str()) => {}
            Some(ty) => errors.push(format!(
                "property '{label}.{name}' has unsupported type '{ty}'"
            )),
            None => errors.push(format!("property '{label}.{name}' is missing a type")),
        }
        if property
            .get("primary_key")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            has_primary_key = true;
        }
    }

    if !has_primary_key {
        errors.push(format!("node '{label}' has no primary key property"));
    }
}

fn validate_relationship(
    relationship: &Value,
    index: usize,
    node_labels: &HashSet<String>,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let Some(relationship) = relationship.as_object() else {
        errors.push(format!("relationships[{index}] must be an object"));
        return;
    };

    let Some(rel_type) = relationship.get("type").and_then(Value::as_str) else {
        errors.push(format!("relationships[{index}] is missing a 'type'"));
        return;
    };

    if rel_type
        .chars()
        .any(|c| c.is_ascii_lowercase())
    {
        warnings.push(format!(
            "relationship type '{rel_type}' should be UPPER_SNAKE_CASE by convention"
        ));
    }

    for endpoint in ["from", "to"] {
        match relationship.get(endpoint).and_then(Value::as_str) {
            Some(label) if node_labels.contains(label) => {}
            Some(label) => errors.push(format!(
                "relationship '{rel_type}' references unknown node label '{label}' in '{endpoint}'"
            )),
            None => errors.push(format!(
                "relationship '{rel_type}' is missing its '{endpoint}' endpoint"
            )),
        }
    }
}
