//! Embedding snapshots
//!
//! A snapshot is the immutable output of one training run: entity and relation
//! tables, the catalog they were trained against, and run metadata. Snapshots are
//! published behind an `Arc` and superseded, never mutated.
//!
//! Export format: a bincode envelope holding a format version, the SHA-256 digest
//! of the payload, and the gzip-compressed bincode payload itself.

use crate::graph::{BatchId, Catalog, EntityId, RelationId};
use crate::kge::scoring::ScoringFunction;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Current export envelope format
const FORMAT_VERSION: u32 = 1;

/// Snapshot errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// No snapshot with this version is retained
    #[error("Unknown snapshot version: {0}")]
    UnknownVersion(u64),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Payload digest does not match the envelope
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Envelope written by an unknown format version
    #[error("Unsupported snapshot format version {0}")]
    UnsupportedFormat(u32),

    /// Tables and vocabulary disagree
    #[error("Inconsistent snapshot: {0}")]
    Inconsistent(String),
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// How a snapshot was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingKind {
    /// From scratch on the whole store
    Full,
    /// Bounded update of a parent snapshot
    FineTune,
}

/// Provenance of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Unique id of the training run
    pub run_id: Uuid,
    pub kind: TrainingKind,
    /// Version of the snapshot a fine-tune started from
    pub parent_version: Option<u64>,
    /// First and last ingestion batch covered by the training facts
    pub batch_range: Option<(BatchId, BatchId)>,
    /// Facts trained on (including held-out validation facts)
    pub fact_count: usize,
    /// Epochs actually run
    pub epochs: usize,
    /// Mean margin loss of the last epoch
    pub final_loss: f32,
    /// Best validation MRR, the one the published parameters achieved
    pub best_mrr: f32,
    pub seed: u64,
    pub created_at: DateTime<Utc>,
}

/// Immutable trained embeddings plus the vocabulary they cover
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSnapshot {
    /// Assigned by the registry on publish; 0 until then
    version: u64,
    scoring: ScoringFunction,
    dim: usize,
    /// One row per entity id
    entities: Array2<f32>,
    /// One row per relation id
    relations: Array2<f32>,
    /// Vocabulary at training time
    catalog: Catalog,
    metadata: SnapshotMetadata,
}

/// On-disk wrapper of an exported snapshot
#[derive(Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u32,
    /// Lowercase hex SHA-256 of `payload`
    digest: String,
    /// gzip(bincode(EmbeddingSnapshot))
    payload: Vec<u8>,
}

fn digest_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

impl EmbeddingSnapshot {
    pub(crate) fn new(
        scoring: ScoringFunction,
        dim: usize,
        entities: Array2<f32>,
        relations: Array2<f32>,
        catalog: Catalog,
        metadata: SnapshotMetadata,
    ) -> Self {
        Self {
            version: 0,
            scoring,
            dim,
            entities,
            relations,
            catalog,
            metadata,
        }
    }

    pub(crate) fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn scoring(&self) -> ScoringFunction {
        self.scoring
    }

    /// Embedding dimension `d` (entity rows are wider for RotatE)
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }

    pub fn entity_count(&self) -> usize {
        self.entities.nrows()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.nrows()
    }

    /// Entities plus relations known to this snapshot
    pub fn vocabulary_size(&self) -> usize {
        self.entity_count() + self.relation_count()
    }

    pub fn entity_table(&self) -> &Array2<f32> {
        &self.entities
    }

    pub fn relation_table(&self) -> &Array2<f32> {
        &self.relations
    }

    pub fn entity(&self, id: EntityId) -> Option<ArrayView1<'_, f32>> {
        (id.index() < self.entities.nrows()).then(|| self.entities.row(id.index()))
    }

    pub fn relation(&self, id: RelationId) -> Option<ArrayView1<'_, f32>> {
        (id.index() < self.relations.nrows()).then(|| self.relations.row(id.index()))
    }

    /// Score a triple, `None` if any id is outside the snapshot
    pub fn score(&self, head: EntityId, relation: RelationId, tail: EntityId) -> Option<f32> {
        Some(self.scoring.score(self.entity(head)?, self.relation(relation)?, self.entity(tail)?))
    }

    /// Write the snapshot as a checksummed, compressed envelope
    pub fn export<W: Write>(&self, writer: W) -> SnapshotResult<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        bincode::serialize_into(&mut encoder, self)?;
        let payload = encoder.finish()?;

        let envelope = SnapshotEnvelope {
            format_version: FORMAT_VERSION,
            digest: digest_hex(&payload),
            payload,
        };
        bincode::serialize_into(writer, &envelope)?;
        debug!(
            "Exported snapshot v{} ({} compressed bytes)",
            self.version,
            envelope.payload.len()
        );
        Ok(())
    }

    /// Read a snapshot written by [`export`](Self::export), verifying its digest
    pub fn import<R: Read>(reader: R) -> SnapshotResult<Self> {
        let envelope: SnapshotEnvelope = bincode::deserialize_from(reader)?;
        if envelope.format_version != FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedFormat(envelope.format_version));
        }

        let actual = digest_hex(&envelope.payload);
        if actual != envelope.digest {
            warn!("Snapshot payload digest mismatch");
            return Err(SnapshotError::ChecksumMismatch {
                expected: envelope.digest,
                actual,
            });
        }

        let snapshot: EmbeddingSnapshot = bincode::deserialize_from(GzDecoder::new(envelope.payload.as_slice()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Every catalog id has exactly one row, and rows have the width the
    /// scoring function expects
    fn validate(&self) -> SnapshotResult<()> {
        let entity_width = self.scoring.entity_width(self.dim);
        let relation_width = self.scoring.relation_width(self.dim);
        if self.dim == 0 || self.entities.ncols() != entity_width || self.relations.ncols() != relation_width {
            return Err(SnapshotError::Inconsistent(format!(
                "{} d={} needs rows of {} and {} values, tables have {} and {}",
                self.scoring,
                self.dim,
                entity_width,
                relation_width,
                self.entities.ncols(),
                self.relations.ncols()
            )));
        }
        if self.entities.nrows() != self.catalog.entity_count() || self.relations.nrows() != self.catalog.relation_count() {
            return Err(SnapshotError::Inconsistent(format!(
                "{} entity and {} relation rows for a vocabulary of {} and {}",
                self.entities.nrows(),
                self.relations.nrows(),
                self.catalog.entity_count(),
                self.catalog.relation_count()
            )));
        }
        Ok(())
    }

    /// Export to a file
    pub fn save(&self, path: impl AsRef<Path>) -> SnapshotResult<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.export(&mut writer)?;
        writer.flush()?;
        info!("Saved snapshot v{} to {:?}", self.version, path);
        Ok(())
    }

    /// Import from a file
    pub fn load(path: impl AsRef<Path>) -> SnapshotResult<Self> {
        let path = path.as_ref();
        let snapshot = Self::import(BufReader::new(File::open(path)?))?;
        info!("Loaded snapshot v{} from {:?}", snapshot.version, path);
        Ok(snapshot)
    }
}
