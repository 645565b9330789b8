use chrono::{DateTime, Utc};
use repoupdater_externalservice::ExternalService;
use repoupdater_types::{ExternalServiceId, ExternalServiceKind};
use std::ops::{Deref, DerefMut};

/// A persisted external service connection (spec.md §4.A): the domain
/// object plus the one field that's genuinely store-owned bookkeeping
/// rather than part of the service's own identity — when the scheduler last
/// synced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalServiceRecord {
    pub service: ExternalService,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl Deref for ExternalServiceRecord {
    type Target = ExternalService;

    fn deref(&self) -> &ExternalService {
        &self.service
    }
}

impl DerefMut for ExternalServiceRecord {
    fn deref_mut(&mut self) -> &mut ExternalService {
        &mut self.service
    }
}

/// The fields a caller supplies to create or update an external service;
/// `id` is `ExternalServiceId::UNPERSISTED` for a fresh insert (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertExternalService {
    pub id: ExternalServiceId,
    pub kind: ExternalServiceKind,
    pub display_name: String,
    pub config: String,
}
