//! OpenAPI / Swagger document parsing.
//!
//! Accepts JSON or YAML, Swagger 2.0 or OpenAPI 3.x. Internal `$ref`s are
//! resolved in place (cycle-guarded), Swagger's `schemes + host + basePath`
//! triple is normalised into `servers`, and every operation is flattened
//! into an [`ApiEndpoint`] with its parameters, body flag, response codes
//! and effective security.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// `$ref` chains deeper than this are treated as cycles.
const MAX_REF_DEPTH: usize = 16;

const HTTP_METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

#[derive(Debug, Error)]
pub enum OpenApiError {
    #[error("document is neither valid JSON nor valid YAML: {0}")]
    Unparseable(String),
    #[error("document has no recognisable openapi/swagger marker")]
    NotOpenApi,
}

/// One operation parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiParameter {
    pub name: String,
    /// `path`, `query`, `header`, or `cookie`.
    pub location: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
}

/// One flattened operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEndpoint {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub parameters: Vec<ApiParameter>,
    pub has_request_body: bool,
    pub response_codes: Vec<String>,
    /// Effective security scheme names; empty means public.
    pub security: Vec<String>,
}

/// Parsed and normalised API description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenApiSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub servers: Vec<String>,
    pub endpoints: Vec<ApiEndpoint>,
}

impl OpenApiSummary {
    /// Endpoints whose effective security is empty.
    pub fn public_endpoints(&self) -> Vec<&ApiEndpoint> {
        self.endpoints.iter().filter(|e| e.security.is_empty()).collect()
    }

    /// Endpoints demanding at least one security scheme.
    pub fn protected_endpoints(&self) -> Vec<&ApiEndpoint> {
        self.endpoints.iter().filter(|e| !e.security.is_empty()).collect()
    }
}

/// Parse a JSON-or-YAML OpenAPI document.
pub fn parse_openapi(text: &str) -> Result<OpenApiSummary, OpenApiError> {
    let root: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(json_err) => serde_yaml::from_str(text)
            .map_err(|yaml_err| OpenApiError::Unparseable(format!("{json_err}; {yaml_err}")))?,
    };

    if root.get("openapi").is_none() && root.get("swagger").is_none() {
        return Err(OpenApiError::NotOpenApi);
    }

    let resolved = resolve_refs(&root, root.clone(), 0);
    Ok(summarise(&resolved))
}

/// Replace internal `{"$ref": "#/..."}` nodes with their targets.
///
/// `ref_depth` counts ref hops only, so deeply nested documents resolve
/// fully while ref cycles still terminate.
fn resolve_refs(root: &Value, value: Value, ref_depth: usize) -> Value {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(pointer)) = map.get("$ref") {
                if ref_depth < MAX_REF_DEPTH
                    && let Some(target) = lookup_pointer(root, pointer)
                {
                    return resolve_refs(root, target.clone(), ref_depth + 1);
                }
                // External, dangling, or cyclic refs stay as-is.
                return Value::Object(map);
            }
            Value::Object(
                map.into_iter()
                    .map(|(key, val)| (key, resolve_refs(root, val, ref_depth)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| resolve_refs(root, item, ref_depth))
                .collect(),
        ),
        other => other,
    }
}

fn lookup_pointer<'a>(root: &'a Value, pointer: &str) -> Option<&'a Value> {
    let path = pointer.strip_prefix("#/")?;
    let mut current = root;
    for raw_segment in path.split('/') {
        let segment = raw_segment.replace("~1", "/").replace("~0", "~");
        current = current.get(segment.as_str())?;
    }
    Some(current)
}

fn summarise(root: &Value) -> OpenApiSummary {
    let info = root.get("info");
    let title = info
        .and_then(|i| i.get("title"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let version = info
        .and_then(|i| i.get("version"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let servers = extract_servers(root);
    let document_security = security_names(root.get("security"));

    let mut endpoints = Vec::new();
    if let Some(paths) = root.get("paths").and_then(Value::as_object) {
        for (path, item) in paths {
            let Some(item) = item.as_object() else { continue };
            let shared_parameters = item
                .get("parameters")
                .map(|p| extract_parameters(p))
                .unwrap_or_default();

            for method in HTTP_METHODS {
                let Some(operation) = item.get(*method).and_then(Value::as_object) else {
                    continue;
                };
                endpoints.push(flatten_operation(
                    method,
                    path,
                    operation,
                    &shared_parameters,
                    &document_security,
                ));
            }
        }
    }
    endpoints.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.method.cmp(&b.method)));

    OpenApiSummary {
        title,
        version,
        servers,
        endpoints,
    }
}

fn extract_servers(root: &Value) -> Vec<String> {
    // OpenAPI 3 lists servers directly.
    if let Some(servers) = root.get("servers").and_then(Value::as_array) {
        return servers
            .iter()
            .filter_map(|server| server.get("url").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
    }

    // Swagger 2.0 spreads the base URL across three fields.
    if root.get("swagger").is_some() {
        let host = root.get("host").and_then(Value::as_str).unwrap_or("");
        if host.is_empty() {
            return Vec::new();
        }
        let base_path = root.get("basePath").and_then(Value::as_str).unwrap_or("");
        let schemes: Vec<&str> = root
            .get("schemes")
            .and_then(Value::as_array)
            .map(|schemes| {
                schemes
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| vec!["https"]);
        return schemes
            .into_iter()
            .map(|scheme| format!("{scheme}://{host}{base_path}"))
            .collect();
    }

    Vec::new()
}

fn flatten_operation(
    method: &str,
    path: &str,
    operation: &Map<String, Value>,
    shared_parameters: &[ApiParameter],
    document_security: &[String],
) -> ApiEndpoint {
    let mut parameters = shared_parameters.to_vec();
    let mut has_request_body = operation.contains_key("requestBody");

    if let Some(own) = operation.get("parameters") {
        for parameter in extract_parameters(own) {
            if !parameters
                .iter()
                .any(|existing| existing.name == parameter.name && existing.location == parameter.location)
            {
                parameters.push(parameter);
            }
        }
        // Swagger 2.0 models bodies as parameters.
        if parameter_locations(own).any(|loc| loc == "body" || loc == "formData") {
            has_request_body = true;
        }
    }
    parameters.retain(|p| p.location != "body" && p.location != "formData");

    let mut response_codes: Vec<String> = operation
        .get("responses")
        .and_then(Value::as_object)
        .map(|responses| responses.keys().cloned().collect())
        .unwrap_or_default();
    response_codes.sort();

    // Operation security overrides the document default; an explicit empty
    // list makes the endpoint public.
    let security = match operation.get("security") {
        Some(own) => security_names(Some(own)),
        None => document_security.to_vec(),
    };

    ApiEndpoint {
        method: method.to_uppercase(),
        path: path.to_string(),
        operation_id: operation
            .get("operationId")
            .and_then(Value::as_str)
            .map(str::to_string),
        summary: operation
            .get("summary")
            .and_then(Value::as_str)
            .map(str::to_string),
        parameters,
        has_request_body,
        response_codes,
        security,
    }
}

fn extract_parameters(value: &Value) -> Vec<ApiParameter> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?.to_string();
            let location = item.get("in")?.as_str()?.to_string();
            let required = item
                .get("required")
                .and_then(Value::as_bool)
                .unwrap_or(location == "path");
            let schema_type = item
                .get("schema")
                .and_then(|schema| schema.get("type"))
                .or_else(|| item.get("type"))
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(ApiParameter {
                name,
                location,
                required,
                schema_type,
            })
        })
        .collect()
}

fn parameter_locations(value: &Value) -> impl Iterator<Item = &str> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("in").and_then(Value::as_str))
}

fn security_names(value: Option<&Value>) -> Vec<String> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut names: Vec<String> = items
        .iter()
        .filter_map(Value::as_object)
        .flat_map(|requirement| requirement.keys().cloned())
        .collect();
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    const OAS3: &str = r##"{
        "openapi": "3.0.3",
        "info": { "title": "Pets", "version": "1.2.0" },
        "servers": [{ "url": "https://api.pets.example/v1" }],
        "security": [{ "apiKey": [] }],
        "components": {
            "parameters": {
                "PageParam": {
                    "name": "page", "in": "query",
                    "schema": { "type": "integer" }
                }
            }
        },
        "paths": {
            "/pets": {
                "get": {
                    "operationId": "listPets",
                    "security": [],
                    "parameters": [{ "$ref": "#/components/parameters/PageParam" }],
                    "responses": { "200": {}, "429": {} }
                },
                "post": {
                    "operationId": "createPet",
                    "requestBody": { "content": {} },
                    "responses": { "201": {} }
                }
            },
            "/pets/{petId}": {
                "parameters": [{ "name": "petId", "in": "path", "required": true,
                                 "schema": { "type": "string" } }],
                "get": { "operationId": "getPet", "responses": { "200": {}, "404": {} } }
            }
        }
    }"##;

    #[test]
    fn oas3_preserves_every_path_and_method() {
        let summary = parse_openapi(OAS3).unwrap();
        let pairs: Vec<(String, String)> = summary
            .endpoints
            .iter()
            .map(|e| (e.method.clone(), e.path.clone()))
            .collect();
        assert!(pairs.contains(&("GET".to_string(), "/pets".to_string())));
        assert!(pairs.contains(&("POST".to_string(), "/pets".to_string())));
        assert!(pairs.contains(&("GET".to_string(), "/pets/{petId}".to_string())));
        assert_eq!(pairs.len(), 3);
        assert_eq!(summary.servers, vec!["https://api.pets.example/v1"]);
        assert_eq!(summary.title.as_deref(), Some("Pets"));
    }

    #[test]
    fn refs_resolve_and_security_partitions() {
        let summary = parse_openapi(OAS3).unwrap();
        let list = summary
            .endpoints
            .iter()
            .find(|e| e.operation_id.as_deref() == Some("listPets"))
            .unwrap();
        // The $ref'd parameter resolved into a concrete query param.
        assert_eq!(list.parameters.len(), 1);
        assert_eq!(list.parameters[0].name, "page");
        assert_eq!(list.parameters[0].location, "query");
        assert_eq!(list.parameters[0].schema_type.as_deref(), Some("integer"));
        // Explicit empty security overrides the document default.
        assert!(list.security.is_empty());

        let create = summary
            .endpoints
            .iter()
            .find(|e| e.operation_id.as_deref() == Some("createPet"))
            .unwrap();
        assert!(create.has_request_body);
        assert_eq!(create.security, vec!["apiKey"]);

        assert_eq!(summary.public_endpoints().len(), 1);
        assert_eq!(summary.protected_endpoints().len(), 2);
    }

    #[test]
    fn path_parameters_inherit_and_default_required() {
        let summary = parse_openapi(OAS3).unwrap();
        let get_pet = summary
            .endpoints
            .iter()
            .find(|e| e.path == "/pets/{petId}")
            .unwrap();
        assert_eq!(get_pet.parameters.len(), 1);
        assert!(get_pet.parameters[0].required);
        assert_eq!(get_pet.response_codes, vec!["200", "404"]);
    }

    #[test]
    fn swagger2_yaml_normalises_servers_and_body() {
        let yaml = r#"
swagger: "2.0"
info:
  title: Legacy
  version: "0.9"
schemes: [https, http]
host: api.legacy.example
basePath: /v2
paths:
  /things:
    post:
      operationId: makeThing
      parameters:
        - name: payload
          in: body
          required: true
          schema: { type: object }
        - name: verbose
          in: query
          type: boolean
      responses:
        "200": {}
"#;
        let summary = parse_openapi(yaml).unwrap();
        assert_eq!(
            summary.servers,
            vec!["https://api.legacy.example/v2", "http://api.legacy.example/v2"]
        );
        let endpoint = &summary.endpoints[0];
        assert_eq!(endpoint.method, "POST");
        assert!(endpoint.has_request_body);
        // The body pseudo-parameter is folded into the flag, not the list.
        assert_eq!(endpoint.parameters.len(), 1);
        assert_eq!(endpoint.parameters[0].name, "verbose");
        assert_eq!(endpoint.parameters[0].schema_type.as_deref(), Some("boolean"));
    }

    #[test]
    fn garbage_and_non_openapi_rejected() {
        assert!(matches!(
            parse_openapi("{ not valid json").unwrap_err(),
            // Invalid JSON still parses as a YAML scalar, so the marker
            // check is what rejects it.
            OpenApiError::NotOpenApi | OpenApiError::Unparseable(_)
        ));
        assert!(matches!(
            parse_openapi(r#"{"hello": "world"}"#).unwrap_err(),
            OpenApiError::NotOpenApi
        ));
    }

    #[test]
    fn cyclic_refs_do_not_hang() {
        let cyclic = r##"{
            "openapi": "3.0.0",
            "info": { "title": "Loop", "version": "1" },
            "components": { "schemas": { "A": { "$ref": "#/components/schemas/A" } } },
            "paths": { "/a": { "get": { "responses": { "200": {} } } } }
        }"##;
        let summary = parse_openapi(cyclic).unwrap();
        assert_eq!(summary.endpoints.len(), 1);
    }
}
