use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{AnyLite, Entity, Lite};
use crate::store::{EntityStore, StoreError, Transaction};

// ============================================================================
// Package & Package Lines
// ============================================================================
//
// A package is a snapshot of targets taken at creation time: lines are
// written once, numbered 1..n, and never added or removed afterwards.
// Only `processed`, `error` and `processed_at` change while a process runs.
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: Option<Uuid>,
    pub name: String,
    pub creation_date: DateTime<Utc>,
    pub total: u32,
}

impl Entity for Package {
    const TYPE_NAME: &'static str = "Package";

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn assign_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn display(&self) -> String {
        format!("{} ({} lines)", self.name, self.total)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageLine {
    pub id: Option<Uuid>,
    pub package: Lite<Package>,
    pub sequence: u32,
    pub target: AnyLite,
    pub processed: bool,
    pub error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl PackageLine {
    pub(crate) fn mark_done(&mut self) {
        self.processed = true;
        self.error = None;
        self.processed_at = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self, error: String) {
        self.processed = true;
        self.error = Some(error);
        self.processed_at = Some(Utc::now());
    }
}

impl Entity for PackageLine {
    const TYPE_NAME: &'static str = "PackageLine";

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn assign_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn display(&self) -> String {
        format!("#{} {}", self.sequence, self.target)
    }
}

/// A package with its id assigned but nothing written yet. Lets a package be
/// persisted in the same transaction as whatever refers to it.
#[derive(Debug, Clone)]
pub struct PackageDraft {
    pub package: Package,
    lite: Lite<Package>,
    targets: Vec<AnyLite>,
}

impl PackageDraft {
    pub fn lite(&self) -> Lite<Package> {
        self.lite.clone()
    }

    /// Writes the package and one line per target, in order.
    pub async fn save_in<T: Transaction>(self, tx: &mut T) -> Result<Package, StoreError> {
        let PackageDraft {
            mut package,
            lite,
            targets,
        } = self;
        tx.save(&mut package).await?;

        for (sequence, target) in (1..=package.total).zip(targets) {
            let mut line = PackageLine {
                id: None,
                package: lite.clone(),
                sequence,
                target,
                processed: false,
                error: None,
                processed_at: None,
            };
            tx.save(&mut line).await?;
        }

        tracing::debug!(package = %lite.id(), lines = package.total, "Created package");
        Ok(package)
    }
}

fn line_count(len: usize) -> Result<u32, StoreError> {
    u32::try_from(len).map_err(|_| StoreError::Transaction(format!("package of {len} lines is too large")))
}

impl Package {
    pub fn draft(name: impl Into<String>, targets: Vec<AnyLite>) -> Result<PackageDraft, StoreError> {
        let id = Uuid::now_v7();
        let package = Package {
            id: Some(id),
            name: name.into(),
            creation_date: Utc::now(),
            total: line_count(targets.len())?,
        };
        let lite = Lite::new(id, package.display());
        Ok(PackageDraft { package, lite, targets })
    }

    /// Persists a package with one line per target, in order.
    pub async fn create_in<T: Transaction>(
        tx: &mut T,
        name: impl Into<String>,
        targets: Vec<AnyLite>,
    ) -> Result<Package, StoreError> {
        Self::draft(name, targets)?.save_in(tx).await
    }

    /// `create_in` on its own transaction.
    pub async fn create<S: EntityStore>(
        store: &S,
        name: impl Into<String>,
        targets: Vec<AnyLite>,
    ) -> Result<Package, StoreError> {
        let mut tx = store.begin().await?;
        let package = Self::create_in(&mut tx, name, targets).await?;
        tx.commit().await?;
        Ok(package)
    }
}

/// Lines of `package` in sequence order.
pub async fn lines_of<S: EntityStore>(store: &S, package: Uuid) -> Result<Vec<PackageLine>, StoreError> {
    let mut lines = store
        .query::<PackageLine>(&|line| line.package.id() == package)
        .await?;
    lines.sort_by_key(|line| line.sequence);
    Ok(lines)
}

/// Lines of `package` still waiting to run, in sequence order.
pub async fn pending_lines_of<S: EntityStore>(store: &S, package: Uuid) -> Result<Vec<PackageLine>, StoreError> {
    let mut lines = store
        .query::<PackageLine>(&|line| line.package.id() == package && !line.processed)
        .await?;
    lines.sort_by_key(|line| line.sequence);
    Ok(lines)
}
