// 🗂️ Registry - the mutation service
//
// Owns the connection and the reconcile policy. Every public mutation:
//   validate → check references → one IMMEDIATE transaction → one change-log
//   row per row touched → commit
// A failed audit write rolls the whole mutation back.
//
// The IMMEDIATE transaction takes SQLite's write lock up front, so two
// refreshes of the same dog cannot interleave their read-diff-write steps.

use crate::audit::{self, ChangeLog, EditContext, Tracked};
use crate::config::{ReconcilePolicy, RegistryConfig};
use crate::db;
use crate::entities::dog::{self, Dog};
use crate::entities::dog_title::{self, DogTitle};
use crate::entities::meet::{self, Meet};
use crate::entities::meet_result::{self, MeetResult};
use crate::entities::race_result::{self, RaceResult};
use crate::entities::title_type::{self, TitleType};
use crate::error::{RegistryError, Result};
use crate::import::{self, ImportMode, ImportSummary};
use crate::reconciliation::{ReconciliationReport, TitleReconciler};
use crate::rollup::{self, MeetRollup};
use crate::rules::{Eligibility, EligibilityEvaluator};
use crate::stats;
use crate::temporal::evaluation_date;
use chrono::NaiveDate;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::Read;

// ============================================================================
// OUTCOMES
// ============================================================================

/// Result of running the full pipeline for one dog.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub dog: Dog,
    pub stats_changed: bool,
    pub titles: ReconciliationReport,
}

/// A meet-result mutation plus the refresh it triggered (automatic policy only).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultChange {
    pub result: MeetResult,
    pub refresh: Option<RefreshOutcome>,
}

/// A race-result mutation, the meet rollup it caused, and the refreshes
/// of dogs whose meet results moved (automatic policy only).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceChange {
    pub result: RaceResult,
    pub rollup: MeetRollup,
    pub refreshed: Vec<RefreshOutcome>,
}

/// Stats recompute, then title reconciliation against the refreshed dog.
pub fn refresh_within(conn: &Connection, cwa_number: &str, ctx: &EditContext) -> Result<RefreshOutcome> {
    let recomputed = stats::recompute_stats(conn, cwa_number, ctx)?;
    let titles = TitleReconciler::for_context(ctx).reconcile(conn, &recomputed.dog, ctx)?;

    Ok(RefreshOutcome {
        dog: recomputed.dog,
        stats_changed: recomputed.changed,
        titles,
    })
}

/// Roll the meet up, then refresh each dog whose meet result moved.
fn rollup_and_refresh(
    policy: ReconcilePolicy,
    conn: &Connection,
    meet_number: &str,
    cleared: Option<&str>,
    ctx: &EditContext,
) -> Result<(MeetRollup, Vec<RefreshOutcome>)> {
    let rollup = rollup::rollup_meet(conn, meet_number, cleared, ctx)?;
    let mut refreshed = Vec::new();
    if policy.is_automatic() {
        for cwa_number in rollup.changed_dogs() {
            refreshed.push(refresh_within(conn, cwa_number, ctx)?);
        }
    }
    Ok((rollup, refreshed))
}

fn refresh_if(
    policy: ReconcilePolicy,
    conn: &Connection,
    cwa_number: &str,
    ctx: &EditContext,
) -> Result<Option<RefreshOutcome>> {
    if policy.is_automatic() {
        refresh_within(conn, cwa_number, ctx).map(Some)
    } else {
        Ok(None)
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

pub struct Registry {
    conn: Connection,
    policy: ReconcilePolicy,
}

impl Registry {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection, policy: ReconcilePolicy) -> Result<Self> {
        db::setup_database(&conn)?;
        Ok(Registry { conn, policy })
    }

    pub fn open(config: &RegistryConfig) -> Result<Self> {
        let conn = db::open_database(&config.database_path)?;
        tracing::info!(
            path = %config.database_path.display(),
            policy = %config.reconcile_policy,
            "registry opened"
        );
        Ok(Registry {
            conn,
            policy: config.reconcile_policy,
        })
    }

    pub fn open_in_memory(policy: ReconcilePolicy) -> Result<Self> {
        Ok(Registry {
            conn: db::open_in_memory()?,
            policy,
        })
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: ReconcilePolicy) {
        self.policy = policy;
    }

    /// Read access for queries not wrapped here.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn write<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ========================================================================
    // DOGS
    // ========================================================================

    pub fn register_dog(&mut self, mut dog: Dog, ctx: &EditContext) -> Result<Dog> {
        dog.validate()?;
        let policy = self.policy;

        self.write(|tx| {
            if dog::exists(tx, &dog.cwa_number)? {
                return Err(RegistryError::already_exists(dog::ENTITY, dog.cwa_number.as_str()));
            }

            dog.version = 1;
            dog.current_grade = EligibilityEvaluator::new(evaluation_date(ctx.at)).grade(&dog);
            dog.stamp(ctx);
            dog::insert(tx, &dog)?;
            audit::log_insert(tx, ctx, &dog)?;

            if policy.is_automatic() {
                TitleReconciler::for_context(ctx).reconcile(tx, &dog, ctx)?;
            }

            tracing::info!(cwa_number = %dog.cwa_number, "dog registered");
            Ok(dog)
        })
    }

    /// Overwrite a dog's editable fields. `dog.version` must match storage.
    ///
    /// The grade is re-derived from the submitted attributes; an edit that
    /// changes nothing writes nothing. Counters are range-checked only where
    /// the edit changes them.
    pub fn edit_dog(&mut self, mut dog: Dog, ctx: &EditContext) -> Result<Dog> {
        let policy = self.policy;

        self.write(|tx| {
            let current = dog::get(tx, &dog.cwa_number)?;
            if current.version != dog.version {
                return Err(RegistryError::conflict(
                    dog::ENTITY,
                    dog.cwa_number.as_str(),
                    format!(
                        "edited version {} but stored version is {}",
                        dog.version, current.version
                    ),
                ));
            }
            dog.validate_edit(&current)?;

            dog.current_grade = EligibilityEvaluator::new(evaluation_date(ctx.at)).grade(&dog);
            dog.last_edited_by = current.last_edited_by.clone();
            dog.last_edited_at = current.last_edited_at;
            if dog == current {
                return Ok(current);
            }

            dog.stamp(ctx);
            let stored = dog::update(tx, &dog)?;
            audit::log_update(tx, ctx, &current, &stored)?;

            if policy.is_automatic() {
                TitleReconciler::for_context(ctx).reconcile(tx, &stored, ctx)?;
            }
            Ok(stored)
        })
    }

    /// Remove a dog with its awarded titles, race results and meet results, each audited.
    ///
    /// Meets the dog raced at are rolled up again so the remaining dogs move up.
    pub fn delete_dog(&mut self, cwa_number: &str, ctx: &EditContext) -> Result<Dog> {
        let policy = self.policy;

        self.write(|tx| {
            let dog = dog::get(tx, cwa_number)?;
            let mut raced_at = BTreeSet::new();

            for held in dog_title::list_for_dog(tx, cwa_number)? {
                dog_title::delete(tx, cwa_number, &held.title)?;
                audit::log_delete(tx, ctx, &held)?;
            }
            for race in race_result::list_for_dog(tx, cwa_number)? {
                race_result::delete(tx, &race.meet_number, cwa_number, &race.program, &race.race_number)?;
                audit::log_delete(tx, ctx, &race)?;
                raced_at.insert(race.meet_number);
            }
            for result in meet_result::list_for_dog(tx, cwa_number)? {
                meet_result::delete(tx, &result.meet_number, cwa_number)?;
                audit::log_delete(tx, ctx, &result)?;
            }

            dog::delete(tx, cwa_number, dog.version)?;
            audit::log_delete(tx, ctx, &dog)?;

            for meet_number in &raced_at {
                rollup_and_refresh(policy, tx, meet_number, None, ctx)?;
            }

            tracing::info!(cwa_number, "dog deleted");
            Ok(dog)
        })
    }

    pub fn find_dog(&self, cwa_number: &str) -> Result<Option<Dog>> {
        dog::find(&self.conn, cwa_number)
    }

    pub fn get_dog(&self, cwa_number: &str) -> Result<Dog> {
        dog::get(&self.conn, cwa_number)
    }

    pub fn list_dogs(&self) -> Result<Vec<Dog>> {
        dog::list(&self.conn)
    }

    // ========================================================================
    // MEETS
    // ========================================================================

    pub fn register_meet(&mut self, mut meet: Meet, ctx: &EditContext) -> Result<Meet> {
        meet.validate()?;

        self.write(|tx| {
            if meet::find(tx, &meet.meet_number)?.is_some() {
                return Err(RegistryError::already_exists(meet::ENTITY, meet.meet_number.as_str()));
            }
            meet.stamp(ctx);
            meet::insert(tx, &meet)?;
            audit::log_insert(tx, ctx, &meet)?;
            Ok(meet)
        })
    }

    pub fn find_meet(&self, meet_number: &str) -> Result<Option<Meet>> {
        meet::find(&self.conn, meet_number)
    }

    pub fn list_meets(&self) -> Result<Vec<Meet>> {
        meet::list(&self.conn)
    }

    // ========================================================================
    // MEET RESULTS
    // ========================================================================

    pub fn record_meet_result(&mut self, mut result: MeetResult, ctx: &EditContext) -> Result<ResultChange> {
        result.validate()?;
        let policy = self.policy;

        self.write(|tx| {
            if !dog::exists(tx, &result.cwa_number)? {
                return Err(RegistryError::not_found(dog::ENTITY, result.cwa_number.as_str()));
            }
            meet::get(tx, &result.meet_number)?;
            if meet_result::find(tx, &result.meet_number, &result.cwa_number)?.is_some() {
                return Err(RegistryError::already_exists(
                    meet_result::ENTITY,
                    result.record_key(),
                ));
            }

            result.stamp(ctx);
            meet_result::insert(tx, &result)?;
            audit::log_insert(tx, ctx, &result)?;

            let refresh = refresh_if(policy, tx, &result.cwa_number, ctx)?;
            Ok(ResultChange { result, refresh })
        })
    }

    pub fn edit_meet_result(&mut self, mut result: MeetResult, ctx: &EditContext) -> Result<ResultChange> {
        result.validate()?;
        let policy = self.policy;

        self.write(|tx| {
            let current = meet_result::get(tx, &result.meet_number, &result.cwa_number)?;
            if current.same_content(&result) {
                return Ok(ResultChange {
                    result: current,
                    refresh: None,
                });
            }

            result.stamp(ctx);
            meet_result::update(tx, &result)?;
            audit::log_update(tx, ctx, &current, &result)?;

            let refresh = refresh_if(policy, tx, &result.cwa_number, ctx)?;
            Ok(ResultChange { result, refresh })
        })
    }

    pub fn delete_meet_result(
        &mut self,
        meet_number: &str,
        cwa_number: &str,
        ctx: &EditContext,
    ) -> Result<ResultChange> {
        let policy = self.policy;

        self.write(|tx| {
            let current = meet_result::get(tx, meet_number, cwa_number)?;
            meet_result::delete(tx, meet_number, cwa_number)?;
            audit::log_delete(tx, ctx, &current)?;

            let refresh = refresh_if(policy, tx, cwa_number, ctx)?;
            Ok(ResultChange {
                result: current,
                refresh,
            })
        })
    }

    pub fn find_meet_result(&self, meet_number: &str, cwa_number: &str) -> Result<Option<MeetResult>> {
        meet_result::find(&self.conn, meet_number, cwa_number)
    }

    pub fn list_meet_results_for_dog(&self, cwa_number: &str) -> Result<Vec<MeetResult>> {
        dog::get(&self.conn, cwa_number)?;
        meet_result::list_for_dog(&self.conn, cwa_number)
    }

    /// Bulk CSV load; see `import::import_meet_results`.
    pub fn import_meet_results<R: Read>(
        &mut self,
        reader: R,
        mode: ImportMode,
        ctx: &EditContext,
    ) -> Result<ImportSummary> {
        let policy = self.policy;
        self.write(|tx| import::import_meet_results(tx, reader, mode, ctx, policy))
    }

    // ========================================================================
    // RACE RESULTS (rolled up into meet results on every change)
    // ========================================================================

    pub fn record_race_result(&mut self, mut result: RaceResult, ctx: &EditContext) -> Result<RaceChange> {
        result.validate()?;
        let policy = self.policy;

        self.write(|tx| {
            if !dog::exists(tx, &result.cwa_number)? {
                return Err(RegistryError::not_found(dog::ENTITY, result.cwa_number.as_str()));
            }
            meet::get(tx, &result.meet_number)?;
            if race_result::find(
                tx,
                &result.meet_number,
                &result.cwa_number,
                &result.program,
                &result.race_number,
            )?
            .is_some()
            {
                return Err(RegistryError::already_exists(
                    race_result::ENTITY,
                    result.record_key(),
                ));
            }

            result.stamp(ctx);
            race_result::insert(tx, &result)?;
            audit::log_insert(tx, ctx, &result)?;

            let (rollup, refreshed) = rollup_and_refresh(policy, tx, &result.meet_number, None, ctx)?;
            Ok(RaceChange {
                result,
                rollup,
                refreshed,
            })
        })
    }

    pub fn edit_race_result(&mut self, mut result: RaceResult, ctx: &EditContext) -> Result<RaceChange> {
        result.validate()?;
        let policy = self.policy;

        self.write(|tx| {
            let current = race_result::get(
                tx,
                &result.meet_number,
                &result.cwa_number,
                &result.program,
                &result.race_number,
            )?;
            if current.same_content(&result) {
                return Ok(RaceChange {
                    result: current,
                    rollup: MeetRollup {
                        meet_number: result.meet_number.clone(),
                        ..MeetRollup::default()
                    },
                    refreshed: Vec::new(),
                });
            }

            result.stamp(ctx);
            race_result::update(tx, &result)?;
            audit::log_update(tx, ctx, &current, &result)?;

            let (rollup, refreshed) = rollup_and_refresh(policy, tx, &result.meet_number, None, ctx)?;
            Ok(RaceChange {
                result,
                rollup,
                refreshed,
            })
        })
    }

    pub fn delete_race_result(
        &mut self,
        meet_number: &str,
        cwa_number: &str,
        program: &str,
        race_number: &str,
        ctx: &EditContext,
    ) -> Result<RaceChange> {
        let policy = self.policy;

        self.write(|tx| {
            let current = race_result::get(tx, meet_number, cwa_number, program, race_number)?;
            race_result::delete(tx, meet_number, cwa_number, program, race_number)?;
            audit::log_delete(tx, ctx, &current)?;

            let (rollup, refreshed) = rollup_and_refresh(policy, tx, meet_number, Some(cwa_number), ctx)?;
            Ok(RaceChange {
                result: current,
                rollup,
                refreshed,
            })
        })
    }

    pub fn find_race_result(
        &self,
        meet_number: &str,
        cwa_number: &str,
        program: &str,
        race_number: &str,
    ) -> Result<Option<RaceResult>> {
        race_result::find(&self.conn, meet_number, cwa_number, program, race_number)
    }

    pub fn list_race_results_for_meet(&self, meet_number: &str) -> Result<Vec<RaceResult>> {
        meet::get(&self.conn, meet_number)?;
        race_result::list_for_meet(&self.conn, meet_number)
    }

    /// Re-run the rollup for a meet, e.g. after race rows were loaded outside the registry.
    pub fn rollup_meet(&mut self, meet_number: &str, ctx: &EditContext) -> Result<MeetRollup> {
        let policy = self.policy;
        self.write(|tx| rollup_and_refresh(policy, tx, meet_number, None, ctx).map(|(rollup, _)| rollup))
    }

    // ========================================================================
    // TITLE CATALOG
    // ========================================================================

    pub fn register_title_type(&mut self, mut title_type: TitleType, ctx: &EditContext) -> Result<TitleType> {
        title_type.validate()?;

        self.write(|tx| {
            if title_type::find(tx, &title_type.title)?.is_some() {
                return Err(RegistryError::already_exists(
                    title_type::ENTITY,
                    title_type.title.as_str(),
                ));
            }
            title_type.stamp(ctx);
            title_type::insert(tx, &title_type)?;
            audit::log_insert(tx, ctx, &title_type)?;
            Ok(title_type)
        })
    }

    pub fn edit_title_type(&mut self, mut title_type: TitleType, ctx: &EditContext) -> Result<TitleType> {
        title_type.validate()?;

        self.write(|tx| {
            let current = title_type::get(tx, &title_type.title)?;
            title_type.last_edited_by = current.last_edited_by.clone();
            title_type.last_edited_at = current.last_edited_at;
            if title_type == current {
                return Ok(current);
            }

            title_type.stamp(ctx);
            title_type::update(tx, &title_type)?;
            audit::log_update(tx, ctx, &current, &title_type)?;
            Ok(title_type)
        })
    }

    /// Remove a catalog code and every award of it, each audited.
    pub fn delete_title_type(&mut self, title: &str, ctx: &EditContext) -> Result<TitleType> {
        self.write(|tx| {
            let current = title_type::get(tx, title)?;

            for held in dog_title::list_for_title(tx, title)? {
                dog_title::delete(tx, &held.cwa_number, title)?;
                audit::log_delete(tx, ctx, &held)?;
            }

            title_type::delete(tx, title)?;
            audit::log_delete(tx, ctx, &current)?;
            Ok(current)
        })
    }

    pub fn find_title_type(&self, title: &str) -> Result<Option<TitleType>> {
        title_type::find(&self.conn, title)
    }

    pub fn list_title_types(&self) -> Result<Vec<TitleType>> {
        title_type::list(&self.conn)
    }

    // ========================================================================
    // AWARDED TITLES (manual; bypasses reconciliation)
    // ========================================================================

    pub fn award_title(&mut self, mut dog_title: DogTitle, ctx: &EditContext) -> Result<DogTitle> {
        dog_title.validate()?;

        self.write(|tx| {
            if !dog::exists(tx, &dog_title.cwa_number)? {
                return Err(RegistryError::not_found(dog::ENTITY, dog_title.cwa_number.as_str()));
            }
            title_type::get(tx, &dog_title.title)?;
            if dog_title::find(tx, &dog_title.cwa_number, &dog_title.title)?.is_some() {
                return Err(RegistryError::already_exists(
                    dog_title::ENTITY,
                    dog_title.record_key(),
                ));
            }

            dog_title.stamp(ctx);
            dog_title::insert(tx, &dog_title)?;
            audit::log_insert(tx, ctx, &dog_title)?;
            Ok(dog_title)
        })
    }

    pub fn edit_dog_title(&mut self, mut dog_title: DogTitle, ctx: &EditContext) -> Result<DogTitle> {
        dog_title.validate()?;

        self.write(|tx| {
            let current = dog_title::get(tx, &dog_title.cwa_number, &dog_title.title)?;
            dog_title.last_edited_by = current.last_edited_by.clone();
            dog_title.last_edited_at = current.last_edited_at;
            if dog_title == current {
                return Ok(current);
            }

            dog_title.stamp(ctx);
            dog_title::update(tx, &dog_title)?;
            audit::log_update(tx, ctx, &current, &dog_title)?;
            Ok(dog_title)
        })
    }

    pub fn revoke_title(&mut self, cwa_number: &str, title: &str, ctx: &EditContext) -> Result<DogTitle> {
        self.write(|tx| {
            let current = dog_title::get(tx, cwa_number, title)?;
            dog_title::delete(tx, cwa_number, title)?;
            audit::log_delete(tx, ctx, &current)?;
            Ok(current)
        })
    }

    pub fn list_dog_titles(&self, cwa_number: &str) -> Result<Vec<DogTitle>> {
        dog::get(&self.conn, cwa_number)?;
        dog_title::list_for_dog(&self.conn, cwa_number)
    }

    // ========================================================================
    // PIPELINE
    // ========================================================================

    /// Recompute stats, average and grade, then reconcile titles.
    pub fn refresh_dog(&mut self, cwa_number: &str, ctx: &EditContext) -> Result<RefreshOutcome> {
        self.write(|tx| refresh_within(tx, cwa_number, ctx))
    }

    /// One transaction per dog; stops at the first failure.
    pub fn refresh_all_dogs(&mut self, ctx: &EditContext) -> Result<Vec<RefreshOutcome>> {
        let numbers = dog::list_numbers(&self.conn)?;
        let mut outcomes = Vec::with_capacity(numbers.len());

        for cwa_number in &numbers {
            outcomes.push(self.refresh_dog(cwa_number, ctx)?);
        }

        let changed = outcomes
            .iter()
            .filter(|o| o.stats_changed || !o.titles.is_noop())
            .count();
        tracing::info!(dogs = outcomes.len(), changed, "refresh of all dogs complete");
        Ok(outcomes)
    }

    /// Reconcile titles against the dog's stored counters, without recomputing them.
    pub fn reconcile_dog_titles(&mut self, cwa_number: &str, ctx: &EditContext) -> Result<ReconciliationReport> {
        self.write(|tx| {
            let dog = dog::get(tx, cwa_number)?;
            TitleReconciler::for_context(ctx).reconcile(tx, &dog, ctx)
        })
    }

    /// Grade and qualifying titles from stored attributes. Writes nothing.
    pub fn evaluate_dog(&self, cwa_number: &str, as_of: NaiveDate) -> Result<Eligibility> {
        let dog = dog::get(&self.conn, cwa_number)?;
        Ok(EligibilityEvaluator::new(as_of).evaluate(&dog))
    }

    // ========================================================================
    // CHANGE LOG
    // ========================================================================

    /// Newest first.
    pub fn change_log(&self) -> Result<Vec<ChangeLog>> {
        audit::list_all(&self.conn)
    }

    pub fn change_log_for_record(&self, table: &str, record_pk: &str) -> Result<Vec<ChangeLog>> {
        audit::list_for_record(&self.conn, table, record_pk)
    }

    pub fn change_log_for_actor(&self, actor: &str) -> Result<Vec<ChangeLog>> {
        audit::list_for_actor(&self.conn, actor)
    }

    pub fn find_change_log(&self, id: i64) -> Result<ChangeLog> {
        audit::find_by_id(&self.conn, id)?
            .ok_or_else(|| RegistryError::not_found("ChangeLog", id.to_string()))
    }

    /// Administrative correction. The deletion itself is not logged.
    pub fn delete_change_log(&mut self, id: i64, ctx: &EditContext) -> Result<ChangeLog> {
        self.write(|tx| audit::delete_by_id(tx, id, &ctx.actor))
    }

    /// Ids of change-log entries whose content no longer matches their hash.
    pub fn verify_change_log(&self) -> Result<Vec<i64>> {
        audit::verify(&self.conn)
    }
}

// ============================================================================
// TESTS
// ============================================================================
