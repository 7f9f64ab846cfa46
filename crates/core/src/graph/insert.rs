//! ANNG construction: link appended objects into the graph.
//!
//! Pending ids are handled in fixed-size batches. Within a batch, every
//! member searches the graph as it stood when the batch started (in
//! parallel), then the batch is committed one id at a time in ascending
//! order. Edge sets therefore depend on the batch size but never on the
//! number of threads.

use crate::error::{IndexError, Result};
use crate::graph::index::Index;
use crate::graph::repository::Node;
use crate::graph::search::{run_query, SearchParams};
use crate::graph::{ObjectDistance, ObjectId};
use crate::thread::WorkerPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Adjacency of already linked nodes as it was before the pass touched them.
#[derive(Debug, Default)]
struct Rollback {
    saved: HashMap<ObjectId, Vec<ObjectDistance>>,
}

impl Rollback {
    fn remember(&mut self, index: &Index, id: ObjectId) {
        if !self.saved.contains_key(&id) {
            if let Some(edges) = index.graph.neighbors(id) {
                self.saved.insert(id, edges);
            }
        }
    }

    fn restore(self, index: &Index, first: ObjectId, last: ObjectId) {
        for (id, edges) in self.saved {
            index.graph.update(id, |node| *node = Node::from_edges(edges));
        }
        for id in first..=last {
            index.graph.update(id, Node::clear);
        }
    }
}

impl Index {
    /// Link every appended but not yet indexed object into the graph.
    ///
    /// All-or-nothing: on error or cancellation the graph is restored and
    /// the pending objects stay unindexed.
    pub fn create_index(&self, thread_count: usize) -> Result<()> {
        let _pass = self.begin_pass();
        let property = self.property();
        let first = self.indexed_count() as ObjectId + 1;
        let last = self.object_count() as ObjectId;
        if first > last {
            tracing::debug!("create_index: nothing pending");
            return Ok(());
        }

        let pool = WorkerPool::new(thread_count)?;
        let started = Instant::now();
        tracing::info!(
            "Building ANNG for objects {}..={} ({} threads, edge size {}, batch {})",
            first,
            last,
            thread_count,
            property.edge_size_for_creation,
            property.batch_size_for_creation
        );

        let mut rollback = Rollback::default();
        let outcome = self.link_pending(&pool, first, last, &mut rollback);
        let joined = pool.join();
        match outcome.and(joined) {
            Ok(()) => {
                tracing::info!(
                    "ANNG built: {} objects linked, {} edges in {:.2?}",
                    last - first + 1,
                    self.edge_count(),
                    started.elapsed()
                );
                Ok(())
            }
            Err(e) => {
                rollback.restore(self, first, last);
                self.set_indexed(first - 1);
                tracing::warn!("ANNG construction rolled back: {}", e);
                Err(e)
            }
        }
    }

    fn link_pending(
        &self,
        pool: &WorkerPool,
        first: ObjectId,
        last: ObjectId,
        rollback: &mut Rollback,
    ) -> Result<()> {
        let property = self.property();
        let batch = property.batch_size_for_creation.min(ObjectId::MAX as usize) as ObjectId;
        let params = SearchParams {
            size: property.edge_size_for_creation,
            exploration: property.insertion_radius_coefficient,
            radius: f32::INFINITY,
            edge_limit: property.edge_size_for_search,
            visit_budget: None,
        };

        let mut start = first;
        while start <= last {
            if self.abort_flag().is_aborted() {
                return Err(IndexError::Cancelled { id: start });
            }
            let end = start.saturating_add(batch - 1).min(last);
            let found = self.search_batch(pool, &params, property.seed_size, start, end)?;
            self.commit_batch(start, found, property.edge_size_for_creation, first, rollback)?;
            self.set_indexed(end);
            tracing::debug!("Linked batch {}..={}", start, end);
            start = match end.checked_add(1) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(())
    }

    /// Neighbor candidates of every id in `start..=end`, in id order.
    fn search_batch(
        &self,
        pool: &WorkerPool,
        params: &SearchParams,
        seed_size: usize,
        start: ObjectId,
        end: ObjectId,
    ) -> Result<Vec<Vec<ObjectDistance>>> {
        let space = Arc::clone(&self.space);
        let graph = Arc::clone(&self.graph);
        let abort = self.abort_flag().clone();
        let params = *params;
        let len = (end - start + 1) as usize;

        let per_range = pool.run_partitioned(len, move |range| {
            let objects = space.read();
            let mut out = Vec::with_capacity(range.len());
            for offset in range {
                let id = start + offset as ObjectId;
                if abort.is_aborted() {
                    return Err(IndexError::Cancelled { id });
                }
                let vector = objects.vector(id);
                let mut found =
                    run_query(&space, &graph, start - 1, seed_size, vector, &params).results;
                // earlier members of the batch are committed before this one
                found.extend(
                    (start..id).map(|other| ObjectDistance::new(other, objects.distance(id, other))),
                );
                found.sort_by(ObjectDistance::ordering);
                found.truncate(params.size);
                out.push(found);
            }
            Ok(out)
        })?;
        Ok(per_range.into_iter().flatten().collect())
    }

    fn commit_batch(
        &self,
        start: ObjectId,
        found: Vec<Vec<ObjectDistance>>,
        degree: usize,
        first: ObjectId,
        rollback: &mut Rollback,
    ) -> Result<()> {
        for (offset, edges) in found.into_iter().enumerate() {
            let id = start + offset as ObjectId;
            for edge in &edges {
                if edge.id < first {
                    rollback.remember(self, edge.id);
                }
            }
            let forward = Node::from_edges(edges);
            let reciprocal: Vec<_> = forward
                .edges()
                .iter()
                .map(|edge| (edge.id, ObjectDistance::new(id, edge.distance)))
                .collect();
            self.graph
                .update(id, |node| *node = forward)
                .ok_or_else(|| IndexError::corrupt(id, "no node for object"))?;
            for (neighbor, edge) in reciprocal {
                self.graph
                    .update(neighbor, |node| node.insert_bounded(edge, degree))
                    .ok_or_else(|| IndexError::corrupt(neighbor, "edge to missing node"))?;
            }
        }
        Ok(())
    }
}
