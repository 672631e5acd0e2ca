//! GraphQL endpoint probing.
//!
//! Runs the standard introspection query (POST, falling back to GET for
//! servers that reject bodies on that route) and, when the schema comes
//! back, generates a handful of shallow sample query documents so later
//! acquisition has something concrete to try.

use serde_json::{json, Value};

/// Depth limit for generated selection sets.
const MAX_QUERY_DEPTH: usize = 3;
/// Fields taken per type when generating selections.
const MAX_FIELDS_PER_TYPE: usize = 10;

/// Compact form of the standard introspection query.
pub const INTROSPECTION_QUERY: &str = "\
query IntrospectionQuery { __schema { queryType { name } types { name kind \
fields { name args { name type { kind } } type { name kind ofType { name kind \
ofType { name kind ofType { name kind } } } } } } } }";

/// Outcome of probing one GraphQL endpoint.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct GraphqlProbe {
    pub endpoint: String,
    pub introspectable: bool,
    /// The server said so explicitly, as opposed to plain failure.
    pub introspection_disabled: bool,
    pub type_count: usize,
    pub query_fields: Vec<String>,
    pub sample_queries: Vec<String>,
}

/// Probe `endpoint` for an introspectable schema.
pub async fn probe_graphql(
    client: &reqwest::Client,
    endpoint: &str,
    max_samples: usize,
) -> GraphqlProbe {
    let mut probe = GraphqlProbe {
        endpoint: endpoint.to_string(),
        ..GraphqlProbe::default()
    };

    let body = match introspect(client, endpoint).await {
        Some(body) => body,
        None => return probe,
    };

    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        let disabled = errors.iter().any(|error| {
            error
                .get("message")
                .and_then(Value::as_str)
                .map(|message| {
                    let message = message.to_lowercase();
                    message.contains("introspection") && message.contains("disabled")
                })
                .unwrap_or(false)
        });
        if disabled {
            probe.introspection_disabled = true;
            return probe;
        }
    }

    let Some(schema) = body.pointer("/data/__schema") else {
        return probe;
    };

    probe.introspectable = true;
    probe.type_count = schema
        .get("types")
        .and_then(Value::as_array)
        .map(|types| types.len())
        .unwrap_or(0);
    probe.query_fields = root_query_fields(schema);
    probe.sample_queries = generate_sample_queries(schema, max_samples);
    probe
}

async fn introspect(client: &reqwest::Client, endpoint: &str) -> Option<Value> {
    let payload = json!({ "query": INTROSPECTION_QUERY });
    let post = client.post(endpoint).json(&payload).send().await;

    match post {
        Ok(response) if matches!(response.status().as_u16(), 400 | 403) => {
            // Some deployments only accept introspection via GET.
            let query = [("query", INTROSPECTION_QUERY)];
            let get = client.get(endpoint).query(&query).send().await.ok()?;
            get.json::<Value>().await.ok()
        }
        Ok(response) => response.json::<Value>().await.ok(),
        Err(_) => None,
    }
}

fn root_query_fields(schema: &Value) -> Vec<String> {
    let Some(query_type) = schema.pointer("/queryType/name").and_then(Value::as_str) else {
        return Vec::new();
    };
    let Some(fields) = type_fields(schema, query_type) else {
        return Vec::new();
    };
    fields
        .iter()
        .filter_map(|field| field.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn type_fields<'a>(schema: &'a Value, type_name: &str) -> Option<&'a Vec<Value>> {
    schema
        .get("types")?
        .as_array()?
        .iter()
        .find(|t| t.get("name").and_then(Value::as_str) == Some(type_name))?
        .get("fields")?
        .as_array()
}

/// Unwrap NON_NULL / LIST wrappers down to the named type.
fn named_type(type_ref: &Value) -> Option<(&str, &str)> {
    let mut current = type_ref;
    for _ in 0..8 {
        let kind = current.get("kind").and_then(Value::as_str)?;
        match kind {
            "NON_NULL" | "LIST" => current = current.get("ofType")?,
            _ => {
                let name = current.get("name").and_then(Value::as_str)?;
                return Some((name, kind));
            }
        }
    }
    None
}

fn has_required_args(field: &Value) -> bool {
    field
        .get("args")
        .and_then(Value::as_array)
        .map(|args| {
            args.iter().any(|arg| {
                arg.pointer("/type/kind").and_then(Value::as_str) == Some("NON_NULL")
            })
        })
        .unwrap_or(false)
}

/// Generate up to `max` shallow query documents from an introspected schema.
pub fn generate_sample_queries(schema: &Value, max: usize) -> Vec<String> {
    let Some(query_type) = schema.pointer("/queryType/name").and_then(Value::as_str) else {
        return Vec::new();
    };
    let Some(fields) = type_fields(schema, query_type) else {
        return Vec::new();
    };

    fields
        .iter()
        .filter(|field| !has_required_args(field))
        .take(max)
        .filter_map(|field| {
            let name = field.get("name").and_then(Value::as_str)?;
            let mut visited = vec![query_type.to_string()];
            let selection = selection_for(schema, field.get("type")?, 1, &mut visited);
            Some(match selection {
                Some(body) => format!("query {{ {name} {body} }}"),
                None => format!("query {{ {name} }}"),
            })
        })
        .collect()
}

/// Selection set for a field type, or `None` for scalars/enums.
fn selection_for(
    schema: &Value,
    type_ref: &Value,
    depth: usize,
    visited: &mut Vec<String>,
) -> Option<String> {
    let (name, kind) = named_type(type_ref)?;
    if kind != "OBJECT" && kind != "INTERFACE" {
        return None;
    }
    if depth >= MAX_QUERY_DEPTH || visited.iter().any(|seen| seen == name) {
        // Cycle or depth floor: fall back to the universally valid field.
        return Some("{ __typename }".to_string());
    }
    visited.push(name.to_string());

    let fields = type_fields(schema, name)?;
    let mut parts: Vec<String> = Vec::new();
    for field in fields.iter().take(MAX_FIELDS_PER_TYPE) {
        if has_required_args(field) {
            continue;
        }
        let Some(field_name) = field.get("name").and_then(Value::as_str) else {
            continue;
        };
        match field
            .get("type")
            .and_then(|t| selection_for(schema, t, depth + 1, visited))
        {
            Some(nested) => parts.push(format!("{field_name} {nested}")),
            None => parts.push(field_name.to_string()),
        }
    }
    visited.pop();

    if parts.is_empty() {
        Some("{ __typename }".to_string())
    } else {
        Some(format!("{{ {} }}", parts.join(" ")))
    }
}
