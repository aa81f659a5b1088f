//! Deferred statement accumulation.

use cmap_store::{BlobRef, Statement, StatementKind};

/// Statements of one or many object writes, grouped by kind.
///
/// [`statements`](StatementBatch::statements) yields deletes first, then
/// updates, then inserts, so a position freed by a delete can be refilled in
/// the same batch. Within a kind, statements keep their push order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatementBatch {
    deletes: Vec<Statement>,
    updates: Vec<Statement>,
    inserts: Vec<Statement>,
    blob_removals: Vec<BlobRef>,
}

impl StatementBatch {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one statement.
    pub fn push(&mut self, statement: Statement) {
        match statement.kind() {
            StatementKind::Delete => self.deletes.push(statement),
            StatementKind::Update => self.updates.push(statement),
            StatementKind::Insert => self.inserts.push(statement),
        }
    }

    /// Queue several statements.
    pub fn extend(&mut self, statements: impl IntoIterator<Item = Statement>) {
        for statement in statements {
            self.push(statement);
        }
    }

    /// Mark a blob file for removal once the batch has been committed.
    pub fn remove_blob(&mut self, blob: BlobRef) {
        self.blob_removals.push(blob);
    }

    /// Fold another batch into this one.
    pub fn append(&mut self, mut other: StatementBatch) {
        self.deletes.append(&mut other.deletes);
        self.updates.append(&mut other.updates);
        self.inserts.append(&mut other.inserts);
        self.blob_removals.append(&mut other.blob_removals);
    }

    /// Total number of statements.
    pub fn len(&self) -> usize {
        self.deletes.len() + self.updates.len() + self.inserts.len()
    }

    /// Returns `true` if no statements were pushed. Blob removals alone do
    /// not make a batch non-empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of queued statements of one kind.
    pub fn count(&self, kind: StatementKind) -> usize {
        match kind {
            StatementKind::Delete => self.deletes.len(),
            StatementKind::Update => self.updates.len(),
            StatementKind::Insert => self.inserts.len(),
        }
    }

    /// Blob files to remove once the batch commits.
    pub fn blob_removals(&self) -> &[BlobRef] {
        &self.blob_removals
    }

    /// All statements in execution order.
    pub fn statements(&self) -> Vec<Statement> {
        self.deletes
            .iter()
            .chain(&self.updates)
            .chain(&self.inserts)
            .cloned()
            .collect()
    }

    /// Split into statements in execution order and blob removals.
    pub fn into_parts(self) -> (Vec<Statement>, Vec<BlobRef>) {
        let mut statements = self.deletes;
        statements.extend(self.updates);
        statements.extend(self.inserts);
        (statements, self.blob_removals)
    }
}
