use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::row::{Row, SharedRow};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultId(String);

impl ResultId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RowSourceError {
    message: String,
}

impl RowSourceError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Paged access to a remote result set. `end` is inclusive and rows come
/// back in stable index order.
#[async_trait]
pub trait RowSource {
    async fn fetch_range(
        &self,
        result_id: &ResultId,
        start: usize,
        end: usize,
    ) -> Result<Vec<Row>, RowSourceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkState {
    InFlight,
    Loaded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub result_id: ResultId,
    pub chunk: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowSlot {
    Ready(SharedRow),
    Loading,
    Failed(String),
    Absent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedRows {
    pub start: usize,
    pub rows: Vec<SharedRow>,
}

/// Sparse, chunk-granular cache of one result set's rows.
#[derive(Debug)]
pub struct RangeCache {
    result_id: ResultId,
    total_rows: usize,
    chunk_size: usize,
    chunks: BTreeMap<usize, ChunkState>,
    rows: BTreeMap<usize, SharedRow>,
    fetch_count: u64,
}

impl RangeCache {
    #[must_use]
    pub fn new(result_id: ResultId, total_rows: usize, chunk_size: usize) -> Self {
        Self {
            result_id,
            total_rows,
            chunk_size: chunk_size.max(1),
            chunks: BTreeMap::new(),
            rows: BTreeMap::new(),
            fetch_count: 0,
        }
    }

    /// Re-points the cache at a new result set. In-flight completions for the
    /// previous result are ignored when they arrive.
    pub fn reset(&mut self, result_id: ResultId, total_rows: usize) {
        self.result_id = result_id;
        self.total_rows = total_rows;
        self.chunks.clear();
        self.rows.clear();
    }

    #[must_use]
    pub fn result_id(&self) -> &ResultId {
        &self.result_id
    }

    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count
    }

    #[must_use]
    pub fn loaded_row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn chunk_of(&self, index: usize) -> usize {
        index / self.chunk_size
    }

    #[must_use]
    pub fn chunk_state(&self, chunk: usize) -> Option<&ChunkState> {
        self.chunks.get(&chunk)
    }

    #[must_use]
    pub fn failed_chunks(&self) -> Vec<(usize, String)> {
        self.chunks
            .iter()
            .filter_map(|(chunk, state)| match state {
                ChunkState::Failed(reason) => Some((*chunk, reason.clone())),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn row(&self, index: usize) -> Option<&SharedRow> {
        self.rows.get(&index)
    }

    #[must_use]
    pub fn slot(&self, index: usize) -> RowSlot {
        if index >= self.total_rows {
            return RowSlot::Absent;
        }
        if let Some(row) = self.rows.get(&index) {
            return RowSlot::Ready(Arc::clone(row));
        }
        match self.chunks.get(&self.chunk_of(index)) {
            Some(ChunkState::Failed(reason)) => RowSlot::Failed(reason.clone()),
            Some(ChunkState::Loaded) => RowSlot::Absent,
            Some(ChunkState::InFlight) | None => RowSlot::Loading,
        }
    }

    #[must_use]
    pub fn is_range_loaded(&self, start: usize, end: usize) -> bool {
        let Some((start, end)) = self.clamp_range(start, end) else {
            return true;
        };
        (self.chunk_of(start)..=self.chunk_of(end))
            .all(|chunk| matches!(self.chunks.get(&chunk), Some(ChunkState::Loaded)))
    }

    /// Rounds `[start, end]` outward to chunk boundaries and returns the
    /// chunks that still need a fetch, marking them in flight. Chunks that
    /// are already loaded or in flight are skipped, so overlapping calls
    /// never duplicate a request. Failed chunks are planned again here.
    pub fn plan_range(&mut self, start: usize, end: usize) -> Vec<ChunkRequest> {
        let Some((start, end)) = self.clamp_range(start, end) else {
            return Vec::new();
        };

        let mut requests = Vec::new();
        for chunk in self.chunk_of(start)..=self.chunk_of(end) {
            let needs_fetch = match self.chunks.get(&chunk) {
                None | Some(ChunkState::Failed(_)) => true,
                Some(ChunkState::InFlight | ChunkState::Loaded) => false,
            };
            if !needs_fetch {
                continue;
            }

            let chunk_start = chunk * self.chunk_size;
            let chunk_end = (chunk_start + self.chunk_size - 1).min(self.total_rows - 1);
            self.chunks.insert(chunk, ChunkState::InFlight);
            self.fetch_count += 1;
            requests.push(ChunkRequest {
                result_id: self.result_id.clone(),
                chunk,
                start: chunk_start,
                end: chunk_end,
            });
        }

        if !requests.is_empty() {
            debug!(
                result_id = %self.result_id,
                start,
                end,
                chunks = requests.len(),
                "planned chunk fetches"
            );
        }
        requests
    }

    /// Applies a fetch outcome. Rows outside the chunk are never touched.
    /// Returns the merged rows, or `None` when the completion is stale.
    pub fn complete_chunk(
        &mut self,
        request: &ChunkRequest,
        outcome: Result<Vec<Row>, RowSourceError>,
    ) -> Option<LoadedRows> {
        if request.result_id != self.result_id {
            debug!(
                stale = %request.result_id,
                current = %self.result_id,
                chunk = request.chunk,
                "ignoring chunk for replaced result set"
            );
            return None;
        }
        if !matches!(self.chunks.get(&request.chunk), Some(ChunkState::InFlight)) {
            debug!(chunk = request.chunk, "ignoring completion for chunk not in flight");
            return None;
        }

        match outcome {
            Ok(rows) => {
                let expected = request.end - request.start + 1;
                if rows.len() != expected {
                    warn!(
                        chunk = request.chunk,
                        expected,
                        received = rows.len(),
                        "row source returned unexpected row count"
                    );
                }
                let shared = rows
                    .into_iter()
                    .take(expected)
                    .map(Arc::new)
                    .collect::<Vec<_>>();
                for (offset, row) in shared.iter().enumerate() {
                    self.rows.insert(request.start + offset, Arc::clone(row));
                }
                self.chunks.insert(request.chunk, ChunkState::Loaded);
                Some(LoadedRows {
                    start: request.start,
                    rows: shared,
                })
            }
            Err(error) => {
                warn!(
                    result_id = %self.result_id,
                    chunk = request.chunk,
                    %error,
                    "chunk fetch failed"
                );
                self.chunks
                    .insert(request.chunk, ChunkState::Failed(error.to_string()));
                None
            }
        }
    }

    /// Guarantees every index in `[start, end]` is loaded, failed, or beyond
    /// the result set once it resolves. Chunk fetches run concurrently.
    pub async fn ensure_range_loaded<S>(
        &mut self,
        source: &S,
        start: usize,
        end: usize,
    ) -> Vec<LoadedRows>
    where
        S: RowSource + ?Sized,
    {
        let requests = self.plan_range(start, end);
        if requests.is_empty() {
            return Vec::new();
        }

        let outcomes = join_all(
            requests
                .iter()
                .map(|request| source.fetch_range(&request.result_id, request.start, request.end)),
        )
        .await;

        requests
            .iter()
            .zip(outcomes)
            .filter_map(|(request, outcome)| self.complete_chunk(request, outcome))
            .collect()
    }

    fn clamp_range(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        if self.total_rows == 0 {
            return None;
        }
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        if start >= self.total_rows {
            return None;
        }
        Some((start, end.min(self.total_rows - 1)))
    }
}
