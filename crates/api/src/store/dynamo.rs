//! DynamoDB implementation of the key-value store contract.
//!
//! Update actions and conditions translate to update/condition expressions;
//! `ConditionalCheckFailedException` maps to [`StoreError::ConditionFailed`]
//! so bind conflicts stay distinguishable from transient faults.

use std::collections::HashMap;

use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::{AttributeValue, DeleteRequest, WriteRequest};
use tracing::{debug, info};

use super::{Condition, Item, Key, KeyValueStore, Page, StoreError, UpdateAction, Value};

/// DynamoDB batch-write limit per request.
const MAX_BATCH_WRITE: usize = 25;

/// How many times a batch delete re-submits unprocessed items.
const MAX_BATCH_ATTEMPTS: usize = 3;

/// DynamoDB-backed [`KeyValueStore`].
#[derive(Clone)]
pub struct DynamoStore {
    client: Client,
}

impl DynamoStore {
    /// Create a store client from the ambient AWS configuration.
    ///
    /// `endpoint_url` overrides the endpoint (local DynamoDB).
    pub async fn new(endpoint_url: Option<&str>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        let client = if let Some(endpoint) = endpoint_url {
            let dynamo_config = aws_sdk_dynamodb::config::Builder::from(&config)
                .endpoint_url(endpoint)
                .build();
            Client::from_conf(dynamo_config)
        } else {
            Client::new(&config)
        };

        info!("Connected to DynamoDB");
        Self { client }
    }

    /// Build a store around an existing client (tests against local stacks).
    #[must_use]
    pub const fn from_client(client: Client) -> Self {
        Self { client }
    }
}

// =============================================================================
// Attribute conversions
// =============================================================================

fn to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Text(s) => AttributeValue::S(s.clone()),
        Value::Int(n) => AttributeValue::N(n.to_string()),
        Value::Float(f) => AttributeValue::N(f.to_string()),
        Value::Bool(b) => AttributeValue::Bool(*b),
    }
}

/// Numbers come back as decimal strings; integral ones become `Int` so JSON
/// output stays a plain integer.
fn from_attribute(attr: &AttributeValue) -> Option<Value> {
    match attr {
        AttributeValue::S(s) => Some(Value::text(s.clone())),
        AttributeValue::N(n) => n
            .parse::<i64>()
            .map(Value::Int)
            .ok()
            .or_else(|| n.parse::<f64>().map(Value::Float).ok()),
        AttributeValue::Bool(b) => Some(Value::Bool(*b)),
        _ => None,
    }
}

fn item_to_attrs(item: &Item) -> HashMap<String, AttributeValue> {
    item.iter()
        .map(|(attr, value)| (attr.clone(), to_attribute(value)))
        .collect()
}

fn attrs_to_item(attrs: &HashMap<String, AttributeValue>) -> Item {
    attrs
        .iter()
        .filter_map(|(attr, value)| from_attribute(value).map(|v| (attr.clone(), v)))
        .collect()
}

fn key_to_attrs(key: &Key) -> HashMap<String, AttributeValue> {
    let mut attrs = HashMap::new();
    let (attr, value) = key.partition();
    attrs.insert(attr.to_owned(), to_attribute(value));
    if let Some((attr, value)) = key.sort() {
        attrs.insert(attr.to_owned(), to_attribute(value));
    }
    attrs
}

// =============================================================================
// Expression building
// =============================================================================

struct UpdateExpression {
    expression: String,
    condition: Option<String>,
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

fn build_update(actions: &[UpdateAction], condition: &Condition) -> UpdateExpression {
    let mut names = HashMap::new();
    let mut values = HashMap::new();
    let mut clauses = Vec::with_capacity(actions.len());

    for (i, action) in actions.iter().enumerate() {
        let name_ph = format!("#a{i}");
        let value_ph = format!(":v{i}");
        match action {
            UpdateAction::Set { attr, value } => {
                names.insert(name_ph.clone(), attr.clone());
                values.insert(value_ph.clone(), to_attribute(value));
                clauses.push(format!("{name_ph} = {value_ph}"));
            }
            UpdateAction::SetIfAbsent { attr, value } => {
                names.insert(name_ph.clone(), attr.clone());
                values.insert(value_ph.clone(), to_attribute(value));
                clauses.push(format!("{name_ph} = if_not_exists({name_ph}, {value_ph})"));
            }
            UpdateAction::Add { attr, delta } => {
                let zero_ph = format!(":z{i}");
                names.insert(name_ph.clone(), attr.clone());
                values.insert(value_ph.clone(), AttributeValue::N(delta.to_string()));
                values.insert(zero_ph.clone(), AttributeValue::N("0".to_owned()));
                clauses.push(format!(
                    "{name_ph} = if_not_exists({name_ph}, {zero_ph}) + {value_ph}"
                ));
            }
        }
    }

    let condition = match condition {
        Condition::Always => None,
        Condition::AbsentOrEquals { attr, value } => {
            names.insert("#cond".to_owned(), attr.clone());
            values.insert(":cond".to_owned(), to_attribute(value));
            Some("attribute_not_exists(#cond) OR #cond = :cond".to_owned())
        }
    };

    UpdateExpression {
        expression: format!("SET {}", clauses.join(", ")),
        condition,
        names,
        values,
    }
}

// =============================================================================
// KeyValueStore implementation
// =============================================================================

#[async_trait::async_trait]
impl KeyValueStore for DynamoStore {
    async fn get(&self, table: &str, key: &Key) -> Result<Option<Item>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key_to_attrs(key)))
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if service.is_provisioned_throughput_exceeded_exception() {
                    StoreError::Unavailable(service.to_string())
                } else {
                    StoreError::Request(service.to_string())
                }
            })?;

        Ok(output.item().map(attrs_to_item))
    }

    async fn put(&self, table: &str, item: Item) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(item_to_attrs(&item)))
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if service.is_provisioned_throughput_exceeded_exception() {
                    StoreError::Unavailable(service.to_string())
                } else {
                    StoreError::Request(service.to_string())
                }
            })?;
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        key: &Key,
        actions: Vec<UpdateAction>,
        condition: Condition,
    ) -> Result<(), StoreError> {
        let built = build_update(&actions, &condition);
        debug!(table, expression = %built.expression, "update");

        let mut request = self
            .client
            .update_item()
            .table_name(table)
            .set_key(Some(key_to_attrs(key)))
            .update_expression(built.expression)
            .set_expression_attribute_names(Some(built.names))
            .set_expression_attribute_values(Some(built.values));
        if let Some(condition) = built.condition {
            request = request.condition_expression(condition);
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let service = err.into_service_error();
                if service.is_conditional_check_failed_exception() {
                    Err(StoreError::ConditionFailed)
                } else if service.is_provisioned_throughput_exceeded_exception() {
                    Err(StoreError::Unavailable(service.to_string()))
                } else {
                    Err(StoreError::Request(service.to_string()))
                }
            }
        }
    }

    async fn delete(&self, table: &str, key: &Key) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(table)
            .set_key(Some(key_to_attrs(key)))
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if service.is_provisioned_throughput_exceeded_exception() {
                    StoreError::Unavailable(service.to_string())
                } else {
                    StoreError::Request(service.to_string())
                }
            })?;
        Ok(())
    }

    async fn delete_batch(&self, table: &str, keys: Vec<Key>) -> Result<usize, StoreError> {
        let total = keys.len();
        let mut shortfall = 0;

        for chunk in keys.chunks(MAX_BATCH_WRITE) {
            let requests = chunk
                .iter()
                .map(|key| {
                    let delete = DeleteRequest::builder()
                        .set_key(Some(key_to_attrs(key)))
                        .build()
                        .map_err(|e| StoreError::Request(e.to_string()))?;
                    Ok(WriteRequest::builder().delete_request(delete).build())
                })
                .collect::<Result<Vec<_>, StoreError>>()?;

            let mut pending: HashMap<String, Vec<WriteRequest>> =
                HashMap::from([(table.to_owned(), requests)]);

            for attempt in 0..MAX_BATCH_ATTEMPTS {
                let output = self
                    .client
                    .batch_write_item()
                    .set_request_items(Some(pending.clone()))
                    .send()
                    .await
                    .map_err(|err| {
                        let service = err.into_service_error();
                        if service.is_provisioned_throughput_exceeded_exception() {
                            StoreError::Unavailable(service.to_string())
                        } else {
                            StoreError::Request(service.to_string())
                        }
                    })?;

                match output.unprocessed_items() {
                    Some(unprocessed) if !unprocessed.is_empty() => {
                        if attempt + 1 == MAX_BATCH_ATTEMPTS {
                            shortfall += unprocessed.values().map(Vec::len).sum::<usize>();
                        } else {
                            pending = unprocessed.clone();
                            continue;
                        }
                    }
                    _ => {}
                }
                break;
            }
        }

        Ok(total - shortfall)
    }

    async fn query_partition(
        &self,
        table: &str,
        attr: &str,
        value: &Value,
        start: Option<Item>,
    ) -> Result<Page, StoreError> {
        let output = self
            .client
            .query()
            .table_name(table)
            .key_condition_expression("#pk = :pk")
            .expression_attribute_names("#pk", attr)
            .expression_attribute_values(":pk", to_attribute(value))
            .set_exclusive_start_key(start.as_ref().map(item_to_attrs))
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if service.is_provisioned_throughput_exceeded_exception() {
                    StoreError::Unavailable(service.to_string())
                } else {
                    StoreError::Request(service.to_string())
                }
            })?;

        Ok(Page {
            items: output.items().iter().map(attrs_to_item).collect(),
            next: output.last_evaluated_key().map(attrs_to_item),
        })
    }

    async fn query_index(
        &self,
        table: &str,
        index: &str,
        attr: &str,
        value: &Value,
        start: Option<Item>,
    ) -> Result<Page, StoreError> {
        let output = self
            .client
            .query()
            .table_name(table)
            .index_name(index)
            .key_condition_expression("#pk = :pk")
            .expression_attribute_names("#pk", attr)
            .expression_attribute_values(":pk", to_attribute(value))
            .set_exclusive_start_key(start.as_ref().map(item_to_attrs))
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if service.is_provisioned_throughput_exceeded_exception() {
                    StoreError::Unavailable(service.to_string())
                } else {
                    StoreError::Request(service.to_string())
                }
            })?;

        Ok(Page {
            items: output.items().iter().map(attrs_to_item).collect(),
            next: output.last_evaluated_key().map(attrs_to_item),
        })
    }

    async fn scan(
        &self,
        table: &str,
        projection: &[&str],
        start: Option<Item>,
    ) -> Result<Page, StoreError> {
        let mut request = self
            .client
            .scan()
            .table_name(table)
            .set_exclusive_start_key(start.as_ref().map(item_to_attrs));

        if !projection.is_empty() {
            // Placeholders for every attribute; projected names may collide
            // with reserved words.
            let placeholders: Vec<String> =
                (0..projection.len()).map(|i| format!("#p{i}")).collect();
            request = request.projection_expression(placeholders.join(", "));
            for (placeholder, attr) in placeholders.iter().zip(projection) {
                request = request.expression_attribute_names(placeholder, *attr);
            }
        }

        let output = request.send().await.map_err(|err| {
            let service = err.into_service_error();
            if service.is_provisioned_throughput_exceeded_exception() {
                StoreError::Unavailable(service.to_string())
            } else {
                StoreError::Request(service.to_string())
            }
        })?;

        Ok(Page {
            items: output.items().iter().map(attrs_to_item).collect(),
            next: output.last_evaluated_key().map(attrs_to_item),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn attribute_roundtrip() {
        assert_eq!(
            from_attribute(&to_attribute(&Value::text("a"))),
            Some(Value::text("a"))
        );
        assert_eq!(
            from_attribute(&to_attribute(&Value::Int(12))),
            Some(Value::Int(12))
        );
        assert_eq!(
            from_attribute(&to_attribute(&Value::Float(1.5))),
            Some(Value::Float(1.5))
        );
        assert_eq!(
            from_attribute(&to_attribute(&Value::Bool(true))),
            Some(Value::Bool(true))
        );
    }

    #[test]
    fn integral_numbers_decode_as_int() {
        assert_eq!(
            from_attribute(&AttributeValue::N("42".to_owned())),
            Some(Value::Int(42))
        );
        assert_eq!(
            from_attribute(&AttributeValue::N("4.25".to_owned())),
            Some(Value::Float(4.25))
        );
    }

    #[test]
    fn build_update_renders_bind_expression() {
        let built = build_update(
            &[
                UpdateAction::set_if_absent("warehouse_id", Value::text("w1")),
                UpdateAction::set("updated_at", Value::text("now")),
            ],
            &Condition::AbsentOrEquals {
                attr: "warehouse_id".into(),
                value: Value::text("w1"),
            },
        );

        assert_eq!(
            built.expression,
            "SET #a0 = if_not_exists(#a0, :v0), #a1 = :v1"
        );
        assert_eq!(
            built.condition.as_deref(),
            Some("attribute_not_exists(#cond) OR #cond = :cond")
        );
        assert_eq!(built.names.get("#a0").map(String::as_str), Some("warehouse_id"));
        assert!(built.values.contains_key(":cond"));
    }

    #[test]
    fn build_update_renders_additive_expression() {
        let built = build_update(&[UpdateAction::add("quantity", 3)], &Condition::Always);
        assert_eq!(built.expression, "SET #a0 = if_not_exists(#a0, :z0) + :v0");
        assert_eq!(
            built.values.get(":v0"),
            Some(&AttributeValue::N("3".to_owned()))
        );
        assert!(built.condition.is_none());
    }
}
