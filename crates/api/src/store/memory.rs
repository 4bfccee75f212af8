//! In-memory key-value store implementation for testing.
//!
//! Provides the same interface as the DynamoDB implementation. All updates
//! run under a single async mutex, so conditional and additive updates are
//! atomic exactly like the durable store's. The page size is configurable
//! so pagination loops get exercised with realistic (tiny) pages.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Condition, Item, Key, KeyValueStore, Page, StoreError, UpdateAction, Value};

/// Key schema of one table.
#[derive(Debug, Clone)]
struct TableSchema {
    partition_attr: String,
    sort_attr: Option<String>,
}

#[derive(Debug, Default)]
struct TableData {
    schema: Option<TableSchema>,
    // Rows ordered by (canonical partition, canonical sort); scan and
    // partition enumeration both walk this order, which keeps
    // continuation keys simple.
    rows: BTreeMap<(String, String), Item>,
}

/// In-memory [`KeyValueStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<HashMap<String, TableData>>>,
    page_size: usize,
}

impl MemoryStore {
    /// Create an empty store with the default page size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
            page_size: 100,
        }
    }

    /// Create an empty store that paginates in pages of `page_size`.
    #[must_use]
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
            page_size: page_size.max(1),
        }
    }

    /// Declare a table's key schema. Must be called before the table is
    /// used (mirrors table creation on the durable store).
    pub async fn create_table(
        &self,
        table: impl Into<String>,
        partition_attr: impl Into<String>,
        sort_attr: Option<&str>,
    ) {
        let mut tables = self.tables.lock().await;
        tables.entry(table.into()).or_default().schema = Some(TableSchema {
            partition_attr: partition_attr.into(),
            sort_attr: sort_attr.map(str::to_owned),
        });
    }

    /// Number of rows currently stored in `table`.
    pub async fn row_count(&self, table: &str) -> usize {
        let tables = self.tables.lock().await;
        tables.get(table).map_or(0, |t| t.rows.len())
    }

    fn page_size(&self) -> usize {
        if self.page_size == 0 { 100 } else { self.page_size }
    }
}

fn schema_of(data: &TableData, table: &str) -> Result<TableSchema, StoreError> {
    data.schema
        .clone()
        .ok_or_else(|| StoreError::Request(format!("unknown table: {table}")))
}

fn row_key(schema: &TableSchema, item: &Item, table: &str) -> Result<(String, String), StoreError> {
    let partition = item
        .get(&schema.partition_attr)
        .ok_or_else(|| {
            StoreError::Request(format!(
                "item for {table} is missing partition attribute {}",
                schema.partition_attr
            ))
        })?
        .canonical();
    let sort = match &schema.sort_attr {
        Some(attr) => item
            .get(attr)
            .ok_or_else(|| {
                StoreError::Request(format!(
                    "item for {table} is missing sort attribute {attr}"
                ))
            })?
            .canonical(),
        None => String::new(),
    };
    Ok((partition, sort))
}

fn key_to_row_key(schema: &TableSchema, key: &Key) -> (String, String) {
    let partition = key.partition().1.canonical();
    let sort = key.sort().map_or_else(String::new, |(_, v)| v.canonical());
    (partition, sort)
}

fn condition_holds(condition: &Condition, existing: Option<&Item>) -> bool {
    match condition {
        Condition::Always => true,
        Condition::AbsentOrEquals { attr, value } => existing
            .and_then(|item| item.get(attr))
            .is_none_or(|current| current == value),
    }
}

fn apply_actions(row: &mut Item, actions: Vec<UpdateAction>) {
    for action in actions {
        match action {
            UpdateAction::Set { attr, value } => {
                row.insert(attr, value);
            }
            UpdateAction::SetIfAbsent { attr, value } => {
                row.entry(attr).or_insert(value);
            }
            UpdateAction::Add { attr, delta } => {
                let current = row.get(&attr).and_then(Value::as_int).unwrap_or(0);
                row.insert(attr, Value::Int(current + delta));
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, table: &str, key: &Key) -> Result<Option<Item>, StoreError> {
        let tables = self.tables.lock().await;
        let Some(data) = tables.get(table) else {
            return Err(StoreError::Request(format!("unknown table: {table}")));
        };
        let schema = schema_of(data, table)?;
        Ok(data.rows.get(&key_to_row_key(&schema, key)).cloned())
    }

    async fn put(&self, table: &str, item: Item) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(data) = tables.get_mut(table) else {
            return Err(StoreError::Request(format!("unknown table: {table}")));
        };
        let schema = schema_of(data, table)?;
        let row_key = row_key(&schema, &item, table)?;
        data.rows.insert(row_key, item);
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        key: &Key,
        actions: Vec<UpdateAction>,
        condition: Condition,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(data) = tables.get_mut(table) else {
            return Err(StoreError::Request(format!("unknown table: {table}")));
        };
        let schema = schema_of(data, table)?;
        let row_key = key_to_row_key(&schema, key);

        if !condition_holds(&condition, data.rows.get(&row_key)) {
            return Err(StoreError::ConditionFailed);
        }

        // Upsert: a missing row is created carrying its key attributes.
        let row = data.rows.entry(row_key).or_insert_with(|| key.to_item());
        apply_actions(row, actions);
        Ok(())
    }

    async fn delete(&self, table: &str, key: &Key) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(data) = tables.get_mut(table) else {
            return Err(StoreError::Request(format!("unknown table: {table}")));
        };
        let schema = schema_of(data, table)?;
        data.rows.remove(&key_to_row_key(&schema, key));
        Ok(())
    }

    async fn delete_batch(&self, table: &str, keys: Vec<Key>) -> Result<usize, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(data) = tables.get_mut(table) else {
            return Err(StoreError::Request(format!("unknown table: {table}")));
        };
        let schema = schema_of(data, table)?;
        let count = keys.len();
        for key in keys {
            data.rows.remove(&key_to_row_key(&schema, &key));
        }
        Ok(count)
    }

    async fn query_partition(
        &self,
        table: &str,
        attr: &str,
        value: &Value,
        start: Option<Item>,
    ) -> Result<Page, StoreError> {
        let tables = self.tables.lock().await;
        let Some(data) = tables.get(table) else {
            return Err(StoreError::Request(format!("unknown table: {table}")));
        };
        let schema = schema_of(data, table)?;
        if schema.partition_attr != attr {
            return Err(StoreError::Request(format!(
                "{table} is not partitioned by {attr}"
            )));
        }

        let wanted = value.canonical();
        let after = start
            .as_ref()
            .map(|item| row_key(&schema, item, table))
            .transpose()?;

        paginate(
            data.rows
                .iter()
                .filter(|((partition, _), _)| *partition == wanted),
            after.as_ref(),
            self.page_size(),
            &schema,
        )
    }

    async fn query_index(
        &self,
        table: &str,
        _index: &str,
        attr: &str,
        value: &Value,
        start: Option<Item>,
    ) -> Result<Page, StoreError> {
        let tables = self.tables.lock().await;
        let Some(data) = tables.get(table) else {
            return Err(StoreError::Request(format!("unknown table: {table}")));
        };
        let schema = schema_of(data, table)?;
        let after = start
            .as_ref()
            .map(|item| row_key(&schema, item, table))
            .transpose()?;

        // An index is just an equality filter on a non-key attribute here.
        paginate(
            data.rows
                .iter()
                .filter(|(_, item)| item.get(attr) == Some(value)),
            after.as_ref(),
            self.page_size(),
            &schema,
        )
    }

    async fn scan(
        &self,
        table: &str,
        projection: &[&str],
        start: Option<Item>,
    ) -> Result<Page, StoreError> {
        let tables = self.tables.lock().await;
        let Some(data) = tables.get(table) else {
            return Err(StoreError::Request(format!("unknown table: {table}")));
        };
        let schema = schema_of(data, table)?;
        let after = start
            .as_ref()
            .map(|item| row_key(&schema, item, table))
            .transpose()?;

        let mut page = paginate(
            data.rows.iter(),
            after.as_ref(),
            self.page_size(),
            &schema,
        )?;
        if !projection.is_empty() {
            for item in &mut page.items {
                item.retain(|attr, _| projection.contains(&attr.as_str()));
            }
        }
        Ok(page)
    }
}

/// Walk `rows` in order, skipping up to and including `after`, and cut one
/// page. The continuation key is the full key fragment of the last row.
fn paginate<'a>(
    rows: impl Iterator<Item = (&'a (String, String), &'a Item)>,
    after: Option<&(String, String)>,
    page_size: usize,
    schema: &TableSchema,
) -> Result<Page, StoreError> {
    let mut items: Vec<Item> = Vec::new();
    let mut more = false;

    for (row_key, item) in rows {
        if let Some(after) = after
            && row_key <= after
        {
            continue;
        }
        if items.len() == page_size {
            more = true;
            break;
        }
        items.push(item.clone());
    }

    let next = if more {
        items.last().map(|item| key_fragment(schema, item))
    } else {
        None
    };

    Ok(Page { items, next })
}

fn key_fragment(schema: &TableSchema, item: &Item) -> Item {
    let mut fragment = Item::new();
    if let Some(value) = item.get(&schema.partition_attr) {
        fragment.insert(schema.partition_attr.clone(), value.clone());
    }
    if let Some(attr) = &schema.sort_attr
        && let Some(value) = item.get(attr)
    {
        fragment.insert(attr.clone(), value.clone());
    }
    fragment
}
