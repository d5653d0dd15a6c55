//! Search definition lifecycle
//!
//! Ownership, locking and validation rules for saved searches. Every write
//! validates criteria by compiling them for the acting user, so a definition
//! that saves is a definition that runs.

use crate::cache::ResultCache;
use crate::db::search::{compile_criterion, CompileContext};
use crate::db::{ChildKind, DefinitionStore, SearchRunStore, UserDirectory};
use crate::fields::{Field, FieldRegistry, ModuleDef};
use crate::models::{
    Destination, ModuleId, RunTarget, Schedule, SearchDefinition, SearchDefinitionDraft, User,
};
use crate::{CompileError, Error, Result};
use chrono::Utc;
use std::sync::Arc;

pub struct SearchDefinitionService {
    store: Arc<dyn DefinitionStore>,
    registry: Arc<FieldRegistry>,
    users: Arc<dyn UserDirectory>,
    runs: Arc<dyn SearchRunStore>,
    cache: ResultCache,
}

impl SearchDefinitionService {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        registry: Arc<FieldRegistry>,
        users: Arc<dyn UserDirectory>,
        runs: Arc<dyn SearchRunStore>,
        cache: ResultCache,
    ) -> Self {
        Self {
            store,
            registry,
            users,
            runs,
            cache,
        }
    }

    pub async fn create(&self, user: &User, draft: SearchDefinitionDraft) -> Result<SearchDefinition> {
        let draft = self.validate(user, draft, None).await?;
        let definition = self.store.insert(user.id, user.system, &draft).await?;
        tracing::info!(
            search_definition_id = definition.id,
            user_id = user.id,
            module = %definition.module,
            "Created search definition"
        );
        Ok(definition)
    }

    /// A definition the user owns.
    pub async fn get(&self, user: &User, id: i64) -> Result<SearchDefinition> {
        let definition = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("search definition {id}")))?;
        if definition.user_id != user.id && !user.sys_admin {
            return Err(Error::Forbidden(format!(
                "search definition {id} belongs to another user"
            )));
        }
        Ok(definition)
    }

    pub async fn list(&self, user: &User, module: Option<&ModuleId>) -> Result<Vec<SearchDefinition>> {
        if let Some(module) = module {
            self.registry.module(module)?;
        }
        self.store.list_for_user(user.id, module).await
    }

    /// Replace a definition's contents. Schedules whose id matches an existing
    /// schedule keep their run history and failure state.
    pub async fn update(
        &self,
        user: &User,
        id: i64,
        mut draft: SearchDefinitionDraft,
    ) -> Result<SearchDefinition> {
        let existing = self.editable(user, id).await?;

        for schedule in &mut draft.schedules {
            match existing.schedule(schedule.id) {
                Some(previous) => schedule.carry_run_state_from(previous),
                None => schedule.id = 0,
            }
        }

        let draft = self.validate(user, draft, Some(id)).await?;
        let updated = self.store.update(id, &draft).await?;
        let dropped = self.cache.invalidate_definition(id);
        tracing::info!(
            search_definition_id = id,
            user_id = user.id,
            cache_entries_dropped = dropped,
            "Updated search definition"
        );
        Ok(updated)
    }

    pub async fn destroy(&self, user: &User, id: i64) -> Result<()> {
        self.editable(user, id).await?;
        if !self.store.delete(id).await? {
            return Err(Error::NotFound(format!("search definition {id}")));
        }
        self.runs.forget(&RunTarget::Definition(id)).await?;
        self.cache.invalidate_definition(id);
        tracing::info!(search_definition_id = id, user_id = user.id, "Deleted search definition");
        Ok(())
    }

    /// Copy a definition under a new name, owned by the same user. Schedules are
    /// only copied when asked, and always start with a clean run history.
    pub async fn copy(
        &self,
        user: &User,
        id: i64,
        new_name: &str,
        with_schedules: bool,
    ) -> Result<SearchDefinition> {
        let source = self.get(user, id).await?;
        let mut draft = SearchDefinitionDraft::from_definition(&source);
        draft.name = new_name.trim().to_string();
        draft.schedules = if with_schedules {
            source.schedules.iter().map(fresh_schedule).collect()
        } else {
            Vec::new()
        };
        self.create(user, draft).await
    }

    /// Give a copy to another user. The giver keeps the original; the copy is
    /// named "<name> (From <giver>)" and carries no schedules.
    pub async fn give_to(
        &self,
        giver: &User,
        id: i64,
        recipient_id: i64,
    ) -> Result<SearchDefinition> {
        let source = self.get(giver, id).await?;
        let recipient = self
            .users
            .get(recipient_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {recipient_id}")))?;

        let authorized =
            giver.company_id == recipient.company_id || giver.admin || giver.sys_admin;
        if !authorized {
            return Err(Error::Forbidden(format!(
                "cannot give search definitions to user {recipient_id}"
            )));
        }

        let mut draft = SearchDefinitionDraft::from_definition(&source);
        draft.schedules.clear();
        let base = format!("{} (From {})", source.name, giver.display_name());
        draft.name = self.free_name(recipient.id, &draft.module, &base).await?;

        // The copy must run for the recipient, not just for the giver.
        let draft = self.validate(&recipient, draft, None).await?;
        let copy = self.store.insert(recipient.id, false, &draft).await?;
        tracing::info!(
            search_definition_id = id,
            copy_id = copy.id,
            giver_id = giver.id,
            recipient_id = recipient.id,
            "Gave search definition"
        );
        Ok(copy)
    }

    pub async fn delete_criterion(&self, user: &User, id: i64, criterion_id: i64) -> Result<()> {
        self.delete_child(user, id, ChildKind::Criterion, criterion_id)
            .await
    }

    pub async fn delete_sort(&self, user: &User, id: i64, sort_id: i64) -> Result<()> {
        self.delete_child(user, id, ChildKind::SortKey, sort_id).await
    }

    pub async fn delete_column(&self, user: &User, id: i64, column_id: i64) -> Result<()> {
        self.delete_child(user, id, ChildKind::Column, column_id).await
    }

    pub async fn delete_schedule(&self, user: &User, id: i64, schedule_id: i64) -> Result<()> {
        self.delete_child(user, id, ChildKind::Schedule, schedule_id)
            .await
    }

    async fn delete_child(
        &self,
        user: &User,
        id: i64,
        kind: ChildKind,
        child_id: i64,
    ) -> Result<()> {
        let definition = self.editable(user, id).await?;
        if kind == ChildKind::Criterion
            && definition.criteria.len() == 1
            && definition.criteria[0].id == child_id
            && !definition.schedules.is_empty()
        {
            return Err(Error::Validation(
                "a scheduled search must keep at least one criterion".to_string(),
            ));
        }
        if !self.store.delete_child(id, kind, child_id).await? {
            return Err(Error::NotFound(format!(
                "{} {child_id} on search definition {id}",
                kind.as_str()
            )));
        }
        if matches!(kind, ChildKind::Criterion | ChildKind::SortKey) {
            self.cache.invalidate_definition(id);
        }
        Ok(())
    }

    /// A definition the user owns and may change. System administrators can
    /// read other users' definitions but never edit them.
    async fn editable(&self, user: &User, id: i64) -> Result<SearchDefinition> {
        let definition = self.get(user, id).await?;
        if definition.user_id != user.id {
            return Err(Error::Forbidden(format!(
                "search definition {id} belongs to another user"
            )));
        }
        if definition.locked && !user.system {
            return Err(Error::Forbidden(format!(
                "search definition {id} is locked"
            )));
        }
        Ok(definition)
    }

    /// First of `base`, `base 2`, `base 3`, ... not used by the user in `module`.
    async fn free_name(&self, user_id: i64, module: &ModuleId, base: &str) -> Result<String> {
        let mut candidate = base.to_string();
        let mut n = 1;
        while self.store.name_taken(user_id, module, &candidate, None).await? {
            n += 1;
            candidate = format!("{base} {n}");
        }
        Ok(candidate)
    }

    async fn validate(
        &self,
        user: &User,
        mut draft: SearchDefinitionDraft,
        existing: Option<i64>,
    ) -> Result<SearchDefinitionDraft> {
        draft.name = draft.name.trim().to_string();
        if draft.name.is_empty() {
            return Err(Error::Validation("name is required".to_string()));
        }
        let module = self.registry.module(&draft.module)?;

        if self
            .store
            .name_taken(user.id, &draft.module, &draft.name, existing)
            .await?
        {
            return Err(Error::Conflict(format!(
                "a search named '{}' already exists",
                draft.name
            )));
        }

        let ctx = CompileContext::for_user(user, Utc::now());
        for criterion in &draft.criteria {
            let field = self.registry.find_in(&module.id, &criterion.field_uid).await?;
            compile_criterion(&field, criterion, &ctx)?;
        }
        for sort in &draft.sort_keys {
            self.visible(&module, &sort.field_uid, user).await?;
        }
        for column in &draft.columns {
            if let Some(uid) = column.field_uid() {
                self.visible(&module, uid, user).await?;
            }
        }

        if !draft.schedules.is_empty() && draft.criteria.is_empty() {
            return Err(Error::Validation(
                "a scheduled search requires at least one criterion".to_string(),
            ));
        }
        for schedule in &draft.schedules {
            validate_schedule(schedule)?;
        }

        Ok(draft)
    }

    async fn visible(&self, module: &ModuleDef, uid: &str, user: &User) -> Result<Arc<Field>> {
        let field = self.registry.find_in(&module.id, uid).await?;
        if !field.is_visible_to(user) {
            tracing::warn!(user_id = user.id, uid = %uid, "Rejected field not visible to user");
            return Err(CompileError::ForbiddenField {
                uid: uid.to_string(),
            }
            .into());
        }
        Ok(field)
    }
}

fn validate_schedule(schedule: &Schedule) -> Result<()> {
    if schedule.run_hour > 23 {
        return Err(Error::Validation(format!(
            "run_hour must be between 0 and 23, got {}",
            schedule.run_hour
        )));
    }
    match &schedule.destination {
        Destination::Email { recipients, .. } => {
            if recipients.iter().all(|r| r.trim().is_empty()) {
                return Err(Error::Validation(
                    "email schedules need at least one recipient".to_string(),
                ));
            }
        }
        Destination::FileTransfer(target) => {
            if target.host.trim().is_empty() {
                return Err(Error::Validation(
                    "file transfer schedules need a host".to_string(),
                ));
            }
        }
    }
    Ok(())
}

fn fresh_schedule(schedule: &Schedule) -> Schedule {
    let mut copy = Schedule::new(schedule.destination.clone(), schedule.run_hour);
    for day in [
        chrono::Weekday::Mon,
        chrono::Weekday::Tue,
        chrono::Weekday::Wed,
        chrono::Weekday::Thu,
        chrono::Weekday::Fri,
        chrono::Weekday::Sat,
        chrono::Weekday::Sun,
    ] {
        copy.set_day(day, schedule.runs_on(day));
    }
    copy
}
