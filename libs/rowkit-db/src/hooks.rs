//! Lifecycle hook dispatch.

use std::fmt;

use tracing::debug;

use crate::context::DbCtx;
use crate::error::RepoError;
use crate::model::Model;

/// The point in a write operation at which a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
}

impl HookStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BeforeCreate => "before_create",
            Self::AfterCreate => "after_create",
            Self::BeforeUpdate => "before_update",
            Self::AfterUpdate => "after_update",
            Self::BeforeDelete => "before_delete",
            Self::AfterDelete => "after_delete",
        }
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoke the `stage` hook on `entity`, if it has hooks and the context does
/// not bypass them.
pub async fn dispatch<S, M>(
    ctx: &DbCtx,
    entity: &mut M,
    stage: HookStage,
) -> Result<(), RepoError>
where
    M: Model<S>,
{
    if ctx.hooks_skipped() {
        return Ok(());
    }
    let Some(hooks) = entity.hooks() else {
        return Ok(());
    };

    let res = match stage {
        HookStage::BeforeCreate => hooks.before_create(ctx).await,
        HookStage::AfterCreate => hooks.after_create(ctx).await,
        HookStage::BeforeUpdate => hooks.before_update(ctx).await,
        HookStage::AfterUpdate => hooks.after_update(ctx).await,
        HookStage::BeforeDelete => hooks.before_delete(ctx).await,
        HookStage::AfterDelete => hooks.after_delete(ctx).await,
    };

    res.map_err(|source| {
        debug!(table = M::table_name(), stage = %stage, error = %source, "hook failed");
        RepoError::Hook {
            table: M::table_name(),
            stage,
            source,
        }
    })
}
