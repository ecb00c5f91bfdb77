// ⚖️ Title Reconciliation - bring awarded titles in line with eligibility
//
//   qualified = check_titles(dog)
//   existing  = codes in dog_titles for the dog
//   to_add    = qualified - existing   (evaluation order)
//   to_remove = existing - qualified   (ascending code order)
//
// Every row inserted or deleted gets exactly one change-log entry. Codes in
// both sets are left alone and produce no entry. Callers run this inside a
// transaction; the read-diff-write sequence is only safe under one.

use crate::audit::{self, EditContext, Tracked};
use crate::entities::dog::Dog;
use crate::entities::dog_title::{self, DogTitle};
use crate::entities::title_type::{self, TitleType};
use crate::error::{RegistryError, Result};
use crate::rules::{EligibilityEvaluator, Title};
use crate::temporal::evaluation_date;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeSet;

pub const RECONCILE_SOURCE: &str = "titles/reconcile";

// ============================================================================
// RECONCILIATION PLAN
// ============================================================================

/// Pure diff between what a dog qualifies for and what it holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationPlan {
    pub qualified: Vec<Title>,
    pub to_add: Vec<Title>,
    pub to_remove: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ReconciliationPlan {
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub cwa_number: String,
    pub qualified: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
    /// Catalog rows created on the way
    pub catalog_created: Vec<String>,
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Titles for {}: {} qualified, +{} [{}], -{} [{}], {} unchanged",
            self.cwa_number,
            self.qualified.len(),
            self.added.len(),
            self.added.join(", "),
            self.removed.len(),
            self.removed.join(", "),
            self.unchanged.len()
        )
    }
}

// ============================================================================
// TITLE RECONCILER
// ============================================================================

pub struct TitleReconciler {
    evaluator: EligibilityEvaluator,
}

impl TitleReconciler {
    pub fn new(as_of: NaiveDate) -> Self {
        TitleReconciler {
            evaluator: EligibilityEvaluator::new(as_of),
        }
    }

    /// Evaluate as of the day the edit is stamped.
    pub fn for_context(ctx: &EditContext) -> Self {
        Self::new(evaluation_date(ctx.at))
    }

    pub fn plan(&self, dog: &Dog, existing: &BTreeSet<String>) -> ReconciliationPlan {
        let qualified = self.evaluator.check_titles(dog);
        let qualified_codes: BTreeSet<String> = qualified.iter().map(Title::code).collect();

        let to_add = qualified
            .iter()
            .filter(|t| !existing.contains(&t.code()))
            .copied()
            .collect();
        let to_remove = existing.difference(&qualified_codes).cloned().collect();
        let unchanged = existing.intersection(&qualified_codes).cloned().collect();

        ReconciliationPlan {
            qualified,
            to_add,
            to_remove,
            unchanged,
        }
    }

    /// Apply the diff for `dog` against storage. `dog` must already carry
    /// freshly recomputed counters.
    pub fn reconcile(
        &self,
        conn: &Connection,
        dog: &Dog,
        ctx: &EditContext,
    ) -> Result<ReconciliationReport> {
        let ctx = ctx.with_source(RECONCILE_SOURCE);
        let existing = dog_title::codes_for_dog(conn, &dog.cwa_number)?;
        let plan = self.plan(dog, &existing);

        let mut report = ReconciliationReport {
            cwa_number: dog.cwa_number.clone(),
            qualified: plan.qualified.iter().map(Title::code).collect(),
            added: Vec::new(),
            removed: Vec::new(),
            unchanged: plan.unchanged.clone(),
            catalog_created: Vec::new(),
            reconciled_at: ctx.at,
        };

        if plan.is_noop() {
            tracing::debug!(cwa_number = %dog.cwa_number, "titles already in sync");
            return Ok(report);
        }

        // Catalog rows first, so the award inserts satisfy the foreign key
        for title in &plan.to_add {
            if ensure_catalog_entry(conn, *title, &ctx)? {
                report.catalog_created.push(title.code());
            }
        }

        for title in &plan.to_add {
            let code = title.code();
            let mut row = DogTitle::placeholder(&dog.cwa_number, &code, ctx.at);
            row.stamp(&ctx);
            dog_title::insert(conn, &row)?;
            audit::log_insert(conn, &ctx, &row)?;
            tracing::debug!(cwa_number = %dog.cwa_number, title = %code, "title added");
            report.added.push(code);
        }

        for code in &plan.to_remove {
            let row = dog_title::find(conn, &dog.cwa_number, code)?.ok_or_else(|| {
                RegistryError::conflict(
                    dog_title::ENTITY,
                    dog_title::key(&dog.cwa_number, code),
                    "removed by another writer during reconciliation",
                )
            })?;
            dog_title::delete(conn, &dog.cwa_number, code)?;
            audit::log_delete(conn, &ctx, &row)?;
            tracing::debug!(cwa_number = %dog.cwa_number, title = %code, "title removed");
            report.removed.push(code.clone());
        }

        tracing::info!("{}", report.summary());
        Ok(report)
    }
}

/// Create the catalog row for `title` if missing; audited only when created.
pub fn ensure_catalog_entry(conn: &Connection, title: Title, ctx: &EditContext) -> Result<bool> {
    let mut entry = TitleType::for_title(title);
    entry.stamp(ctx);

    let created = title_type::insert_if_absent(conn, &entry)?;
    if created {
        audit::log_insert(conn, ctx, &entry)?;
        tracing::debug!(title = %entry.title, "catalog entry created");
    }
    Ok(created)
}

// ============================================================================
// TESTS
// ============================================================================
