use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::{
    error::{DisplayErrorContext, SdkError},
    operation::{put_item::PutItemError, update_item::UpdateItemError},
    types::{AttributeValue, ReturnValue},
    Client as DynamoClient,
};
use chrono::{DateTime, Utc};
use serde_json::{Number, Value};

use super::{Collection, Document, DocumentStore, Filter, ListEdit, StoreError};

/// Single-table DynamoDB store. Items live under `PK = <COLLECTION>`,
/// `SK = <ENTITY>#<id>`; every other attribute is a document field.
pub struct DynamoStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    fn key(collection: Collection, id: &str) -> HashMap<String, AttributeValue> {
        HashMap::from([
            (
                "PK".to_string(),
                AttributeValue::S(collection.partition().to_string()),
            ),
            ("SK".to_string(), AttributeValue::S(collection.sort_key(id))),
        ])
    }
}

#[async_trait]
impl DocumentStore for DynamoStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key(collection, id)))
            .send()
            .await
            .map_err(backend)?;

        Ok(result.item().map(item_to_document))
    }

    async fn put(&self, collection: Collection, id: &str, doc: Document) -> Result<(), StoreError> {
        let mut item = Self::key(collection, id);
        for (name, value) in &doc {
            item.insert(name.clone(), to_attribute(value));
        }

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn insert(
        &self,
        collection: Collection,
        id: &str,
        doc: Document,
    ) -> Result<bool, StoreError> {
        let mut item = Self::key(collection, id);
        for (name, value) in &doc {
            item.insert(name.clone(), to_attribute(value));
        }

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(PK)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e)
                if matches!(
                    e.as_service_error(),
                    Some(PutItemError::ConditionalCheckFailedException(_))
                ) =>
            {
                Ok(false)
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Document,
    ) -> Result<(), StoreError> {
        if fields.is_empty() {
            return match self.get(collection, id).await? {
                Some(_) => Ok(()),
                None => Err(StoreError::NotFound),
            };
        }

        let mut update_expr = vec![];
        let mut builder = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key(collection, id)))
            .condition_expression("attribute_exists(PK)");

        for (i, (name, value)) in fields.iter().enumerate() {
            update_expr.push(format!("#a{} = :v{}", i, i));
            builder = builder
                .expression_attribute_names(format!("#a{}", i), name)
                .expression_attribute_values(format!(":v{}", i), to_attribute(value));
        }

        builder
            .update_expression(format!("SET {}", update_expr.join(", ")))
            .send()
            .await
            .map_err(|e| {
                if is_condition_failure(&e) {
                    StoreError::NotFound
                } else {
                    backend(e)
                }
            })?;
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key(collection, id)))
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn query(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        let mut documents = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let mut req = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("PK = :pk")
                .expression_attribute_values(
                    ":pk",
                    AttributeValue::S(collection.partition().to_string()),
                );

            if !filter.equals.is_empty() {
                let mut clauses = vec![];
                for (i, (field, value)) in filter.equals.iter().enumerate() {
                    clauses.push(format!("#f{} = :f{}", i, i));
                    req = req
                        .expression_attribute_names(format!("#f{}", i), field)
                        .expression_attribute_values(
                            format!(":f{}", i),
                            AttributeValue::S(value.clone()),
                        );
                }
                req = req.filter_expression(clauses.join(" AND "));
            }

            let resp = req
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(backend)?;

            documents.extend(resp.items().iter().map(item_to_document));

            match resp.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(documents)
    }

    async fn edit_list(
        &self,
        collection: Collection,
        id: &str,
        attribute: &str,
        edit: ListEdit,
        updated_at: DateTime<Utc>,
    ) -> Result<Document, StoreError> {
        let updated = to_attribute(&serde_json::to_value(updated_at)?);

        let builder = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key(collection, id)))
            .expression_attribute_names("#list", attribute)
            .expression_attribute_names("#updated", "updated_at")
            .expression_attribute_values(":updated", updated)
            .return_values(ReturnValue::AllNew);

        let appending = matches!(edit, ListEdit::Append(_));
        let builder = match edit {
            // list_append is applied server-side, so concurrent appends never
            // overwrite each other.
            ListEdit::Append(value) => builder
                .condition_expression("attribute_exists(PK)")
                .update_expression(
                    "SET #list = list_append(if_not_exists(#list, :empty), :items), #updated = :updated",
                )
                .expression_attribute_values(":empty", AttributeValue::L(vec![]))
                .expression_attribute_values(":items", AttributeValue::L(vec![to_attribute(&value)])),
            // DynamoDB cannot remove list elements by value, so write the
            // filtered list back guarded by the updated_at we read.
            ListEdit::Remove(value) => {
                let current = self
                    .get(collection, id)
                    .await?
                    .ok_or(StoreError::NotFound)?;
                let mut items = current
                    .get(attribute)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                items.retain(|item| item != &value);

                let builder = builder
                    .update_expression("SET #list = :items, #updated = :updated")
                    .expression_attribute_values(":items", to_attribute(&Value::Array(items)));

                match current.get("updated_at") {
                    Some(previous) => builder
                        .condition_expression("#updated = :previous")
                        .expression_attribute_values(":previous", to_attribute(previous)),
                    None => builder
                        .condition_expression("attribute_exists(PK) AND attribute_not_exists(#updated)"),
                }
            }
        };

        let result = builder.send().await.map_err(|e| {
            if is_condition_failure(&e) {
                condition_failed(appending)
            } else {
                backend(e)
            }
        })?;

        Ok(result.attributes().map(item_to_document).unwrap_or_default())
    }
}

fn backend<E: std::error::Error>(err: E) -> StoreError {
    StoreError::Backend(DisplayErrorContext(err).to_string())
}

/// An append is only guarded by the item existing; a remove by the
/// updated_at it read.
fn condition_failed(appending: bool) -> StoreError {
    if appending {
        StoreError::NotFound
    } else {
        StoreError::Conflict
    }
}

fn is_condition_failure<R>(err: &SdkError<UpdateItemError, R>) -> bool {
    matches!(
        err.as_service_error(),
        Some(UpdateItemError::ConditionalCheckFailedException(_))
    )
}

fn item_to_document(item: &HashMap<String, AttributeValue>) -> Document {
    item.iter()
        .filter(|(name, _)| name.as_str() != "PK" && name.as_str() != "SK")
        .map(|(name, value)| (name.clone(), from_attribute(value)))
        .collect()
}

pub(crate) fn to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), to_attribute(v)))
                .collect(),
        ),
    }
}

pub(crate) fn from_attribute(attr: &AttributeValue) -> Value {
    match attr {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => parse_number(n),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::L(items) => Value::Array(items.iter().map(from_attribute).collect()),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), from_attribute(v)))
                .collect(),
        ),
        AttributeValue::Ss(items) => {
            Value::Array(items.iter().cloned().map(Value::String).collect())
        }
        AttributeValue::Ns(items) => Value::Array(items.iter().map(|n| parse_number(n)).collect()),
        _ => Value::Null,
    }
}

fn parse_number(n: &str) -> Value {
    if let Ok(i) = n.parse::<i64>() {
        return Value::Number(i.into());
    }
    n.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(n.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submission_document_survives_attribute_conversion() {
        let doc = json!({
            "id": "s1",
            "growth_stage": "Seedling",
            "plant_conditions": ["healthy", "weeds"],
            "trait_measurements": {
                "culm_length": 72.5,
                "panicle_length": 21.0,
                "panicles_per_hill": 14,
                "hills_observed": 10
            },
            "images": [],
            "notes": "",
            "flagged": false,
            "reviewer": null
        });

        let attr = to_attribute(&doc);
        let back = from_attribute(&attr);

        assert_eq!(back["id"], "s1");
        assert_eq!(back["plant_conditions"], json!(["healthy", "weeds"]));
        assert_eq!(back["trait_measurements"]["culm_length"].as_f64(), Some(72.5));
        assert_eq!(back["trait_measurements"]["panicles_per_hill"].as_u64(), Some(14));
        assert_eq!(back["images"], json!([]));
        assert_eq!(back["flagged"], json!(false));
        assert_eq!(back["reviewer"], Value::Null);
    }

    #[test]
    fn test_numbers_normalised_by_dynamo_still_decode() {
        // DynamoDB returns 21.0 as "21"
        assert_eq!(parse_number("21"), json!(21));
        assert_eq!(parse_number("0.25"), json!(0.25));
        assert_eq!(parse_number("-3"), json!(-3));
    }

    #[test]
    fn test_item_keys_are_stripped() {
        let mut item = DynamoStore::key(Collection::Fields, "f1");
        item.insert("name".to_string(), AttributeValue::S("Plot 1".to_string()));

        let doc = item_to_document(&item);
        assert_eq!(doc.len(), 1);
        assert_eq!(doc["name"], "Plot 1");
    }

    #[test]
    fn test_failed_append_means_the_item_is_gone() {
        assert!(matches!(condition_failed(true), StoreError::NotFound));
        assert!(matches!(condition_failed(false), StoreError::Conflict));
    }
}
