
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType,
    query::{ExecutableQuery, QueryBase},
};
use std::sync::Arc;
use tracing::{debug, info};

use super::IndexRecord;
use crate::RagError;
use crate::config::IndexLocation;

/// Flat (exhaustive) L2 vector index stored as a LanceDB table
///
/// No ANN index is ever built on the table, so every search scans all rows.
pub struct VectorStore {
    connection: Connection,
    table_name: String,
    vector_dimension: Option<usize>,
}

/// One nearest-neighbour hit
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    /// Row position, matching the sidecar position
    pub position: usize,
    pub source: String,
    /// Squared L2 distance as reported by Lance; ordering matches true L2
    pub distance: f32,
}

impl VectorStore {
    /// Connect for writing, creating the database directory if needed
    #[inline]
    pub async fn connect(location: &IndexLocation) -> Result<Self, RagError> {
        std::fs::create_dir_all(&location.vectors_dir).map_err(|e| {
            RagError::Index(format!("Failed to create vector database directory: {}", e))
        })?;

        Self::connect_existing(location).await
    }

    /// Open an existing database without touching the filesystem
    ///
    /// Returns `None` when the database directory has never been created.
    #[inline]
    pub async fn open(location: &IndexLocation) -> Result<Option<Self>, RagError> {
        if !location.vectors_dir.is_dir() {
            debug!(
                "No vector database at {}",
                location.vectors_dir.display()
            );
            return Ok(None);
        }

        Self::connect_existing(location).await.map(Some)
    }

    async fn connect_existing(location: &IndexLocation) -> Result<Self, RagError> {
        debug!("Opening LanceDB at {}", location.vectors_dir.display());

        let uri = location.vectors_dir.to_string_lossy().into_owned();
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| RagError::Index(format!("Failed to connect to LanceDB: {}", e)))?;

        let mut store = Self {
            connection,
            table_name: location.table.clone(),
            vector_dimension: None,
        };

        if store.table_exists().await? {
            let dim = store.detect_existing_vector_dimension().await?;
            debug!("Detected existing vector dimension: {}", dim);
            store.vector_dimension = Some(dim);
        }

        Ok(store)
    }

    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.vector_dimension
    }

    #[inline]
    pub async fn table_exists(&self) -> Result<bool, RagError> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Index(format!("Failed to list tables: {}", e)))?;

        Ok(table_names.contains(&self.table_name))
    }

    async fn detect_existing_vector_dimension(&self) -> Result<usize, RagError> {
        let table = self.open_table().await?;

        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::Index(format!("Failed to get table schema: {}", e)))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(*size as usize);
                }
            }
        }

        Err(RagError::Index(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    fn create_schema(vector_dim: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("position", DataType::UInt32, false),
            Field::new("source", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    vector_dim as i32,
                ),
                false,
            ),
        ]))
    }

    /// Replace the whole table with `records`, in order
    ///
    /// All records must share one dimension, which becomes the index dimension.
    #[inline]
    pub async fn replace_all(&mut self, records: &[IndexRecord]) -> Result<(), RagError> {
        let vector_dim = records
            .first()
            .map(|record| record.vector.len())
            .ok_or_else(|| RagError::Index("Refusing to write an empty index".to_string()))?;

        self.drop_table_if_exists().await?;

        let schema = Self::create_schema(vector_dim);
        self.connection
            .create_empty_table(&self.table_name, Arc::clone(&schema))
            .execute()
            .await
            .map_err(|e| RagError::Index(format!("Failed to create table: {}", e)))?;
        self.vector_dimension = Some(vector_dim);

        let record_batch = Self::create_record_batch(schema, vector_dim, records)?;
        let table = self.open_table().await?;

        let batch_schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), batch_schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| RagError::Index(format!("Failed to insert vectors: {}", e)))?;

        info!(
            "Stored {} vectors with {} dimensions in table {}",
            records.len(),
            vector_dim,
            self.table_name
        );
        Ok(())
    }

    fn create_record_batch(
        schema: Arc<Schema>,
        vector_dim: usize,
        records: &[IndexRecord],
    ) -> Result<RecordBatch, RagError> {
        let len = records.len();
        let mut ids = Vec::with_capacity(len);
        let mut positions = Vec::with_capacity(len);
        let mut sources = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * vector_dim);

        for record in records {
            if record.vector.len() != vector_dim {
                return Err(RagError::DimensionMismatch {
                    expected: vector_dim,
                    actual: record.vector.len(),
                });
            }
            ids.push(record.id.as_str());
            positions.push(record.position);
            sources.push(record.source.as_str());
            flat_values.extend_from_slice(&record.vector);
        }

        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array =
            FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(values_array), None)
                .map_err(|e| RagError::Index(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(UInt32Array::from(positions)),
            Arc::new(StringArray::from(sources)),
            Arc::new(vector_array),
        ];

        RecordBatch::try_new(schema, arrays)
            .map_err(|e| RagError::Index(format!("Failed to create record batch: {}", e)))
    }

    /// The `k` rows nearest to `query_vector` by L2 distance, nearest first
    #[inline]
    pub async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchHit>, RagError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        if let Some(expected) = self.vector_dimension {
            if expected != query_vector.len() {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: query_vector.len(),
                });
            }
        }

        let table = self.open_table().await?;

        let results = table
            .vector_search(query_vector)
            .map_err(|e| RagError::Index(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::L2)
            .bypass_vector_index()
            .limit(k)
            .execute()
            .await
            .map_err(|e| RagError::Index(format!("Failed to execute search: {}", e)))?;

        let mut hits = Self::collect_hits(results).await?;
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(hits)
    }

    async fn collect_hits(
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<SearchHit>, RagError> {
        let mut hits = Vec::new();

        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| RagError::Index(format!("Failed to read result stream: {}", e)))?
        {
            hits.extend(Self::parse_search_batch(&batch)?);
        }

        debug!("Parsed {} search hits", hits.len());
        Ok(hits)
    }

    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchHit>, RagError> {
        let ids = typed_column::<StringArray>(batch, "id")?;
        let positions = typed_column::<UInt32Array>(batch, "position")?;
        let sources = typed_column::<StringArray>(batch, "source")?;
        let distances = typed_column::<Float32Array>(batch, "_distance")?;

        Ok((0..batch.num_rows())
            .map(|row| SearchHit {
                id: ids.value(row).to_string(),
                position: positions.value(row) as usize,
                source: sources.value(row).to_string(),
                distance: distances.value(row),
            })
            .collect())
    }

    #[inline]
    pub async fn count_rows(&self) -> Result<usize, RagError> {
        let table = self.open_table().await?;

        table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Index(format!("Failed to count rows: {}", e)))
    }

    async fn open_table(&self) -> Result<lancedb::Table, RagError> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| RagError::Index(format!("Failed to open table {}: {}", self.table_name, e)))
    }

    async fn drop_table_if_exists(&self) -> Result<(), RagError> {
        if self.table_exists().await? {
            info!("Dropping existing table {}", self.table_name);
            self.connection
                .drop_table(&self.table_name)
                .await
                .map_err(|e| RagError::Index(format!("Failed to drop table: {}", e)))?;
        }

        Ok(())
    }
}

fn typed_column<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a T, RagError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Index(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| RagError::Index(format!("Invalid {} column type", name)))
}
