//! Ingestion — 스키마 등록, 레코드 추가, 보존 정리, JSONL 입출력

use super::{Engine, metadata};
use crate::config::DurabilityLevel;
use crate::error::MelvinResult;
use crate::record::{IngestRecord, RecordId};
use crate::schema::DomainSchema;
use crate::storage::{self, ImportSummary};
use std::io::{BufRead, Write};
use tracing::{debug, info, instrument};

impl Engine {
    /// Registers or additively revises a domain schema; returns its version.
    #[instrument(skip(self, schema), fields(domain = %schema.domain))]
    pub fn register_schema(&self, schema: DomainSchema) -> MelvinResult<u64> {
        let domain = schema.domain.clone();
        let lock = self.domain_lock(&domain);
        let _guard = lock.lock();

        let before = self.registry.current_version(&domain).ok();
        let version = self.registry.register(schema)?;
        if before != Some(version) {
            metadata::save_schema_history(self.backend.as_ref(), &self.registry, &domain)?;
            if self.config.durability != DurabilityLevel::None {
                self.backend.flush()?;
            }
        }
        Ok(version)
    }

    /// Appends one record after checking its fields against the schema.
    ///
    /// Fails with `DuplicateId` when an explicit id already exists.
    #[instrument(skip(self, record), fields(domain = %domain))]
    pub fn append(&self, domain: &str, record: IngestRecord) -> MelvinResult<RecordId> {
        let schema = self.registry.get(domain)?;
        schema.check_fields(&record.fields)?;

        let lock = self.domain_lock(domain);
        let _guard = lock.lock();
        let id = self.store.append(domain, record)?;
        if self.config.refresh_on_append {
            self.indexes.refresh_domain(&schema, &self.store)?;
        }
        debug!(id = id.0, "appended record");
        Ok(id)
    }

    /// Appends records in order under one lock; stops at the first error.
    #[instrument(skip(self, records), fields(domain = %domain))]
    pub fn append_batch<I>(&self, domain: &str, records: I) -> MelvinResult<Vec<RecordId>>
    where
        I: IntoIterator<Item = IngestRecord>,
    {
        let schema = self.registry.get(domain)?;
        let lock = self.domain_lock(domain);
        let _guard = lock.lock();

        let mut ids = Vec::new();
        for record in records {
            schema.check_fields(&record.fields)?;
            ids.push(self.store.append(domain, record)?);
        }
        if self.config.refresh_on_append && !ids.is_empty() {
            self.indexes.refresh_domain(&schema, &self.store)?;
        }
        info!(appended = ids.len(), "appended batch");
        Ok(ids)
    }

    /// Removes records older than `before` (epoch ms); returns how many.
    ///
    /// Unknown domains remove nothing. Indexes of the domain are rebuilt from
    /// the remaining records.
    #[instrument(skip(self), fields(domain = %domain))]
    pub fn prune(&self, domain: &str, before: i64) -> MelvinResult<usize> {
        let lock = self.domain_lock(domain);
        let _guard = lock.lock();

        let removed = self.store.prune(domain, before)?;
        if removed == 0 {
            return Ok(0);
        }
        let shapes = self.indexes.shapes(domain);
        self.indexes.drop_domain(domain)?;
        if let Ok(schema) = self.registry.get(domain) {
            for shape in &shapes {
                self.indexes.build_or_refresh(&schema, &self.store, shape)?;
            }
        }
        info!(removed, rebuilt = shapes.len(), "pruned domain");
        Ok(removed)
    }

    /// Imports a JSONL record log; existing ids are counted, not fatal.
    #[instrument(skip(self, reader), fields(domain = %domain))]
    pub fn import_jsonl<R: BufRead>(&self, domain: &str, reader: R) -> MelvinResult<ImportSummary> {
        self.registry.get(domain)?;
        let summary = storage::import_jsonl(reader, |record| self.append(domain, record).map(|_| ()))?;
        info!(imported = summary.imported, duplicates = summary.duplicates, "imported JSONL");
        Ok(summary)
    }

    /// Writes the domain's record log as JSONL; returns the record count.
    pub fn export_jsonl<W: Write>(&self, domain: &str, writer: W) -> MelvinResult<usize> {
        storage::export_jsonl(&self.store, domain, writer)
    }
}
