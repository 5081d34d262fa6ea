//! Persistence: connection, schema, and the transaction boundary every
//! mutating operation goes through.

pub mod queries;
pub mod tracked;

use std::path::Path;

use sea_orm::sea_query::Index;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction,
    EntityTrait, Schema, TransactionTrait,
};
use tracing::{debug, error};
use url::Url;

use crate::entities::{goal, plan, session_binding, step};
use crate::error::AppError;

#[derive(Clone, Debug)]
pub struct Store {
    db: DatabaseConnection,
}

impl Store {
    /// Opens (creating if needed) the sqlite file at `path` and brings the
    /// schema up to date.
    pub async fn open(path: &Path) -> Result<Self, AppError> {
        let db = connect(path).await?;
        let store = Self { db };
        store.migrate().await?;
        debug!(path = %path.display(), "store opened");
        Ok(store)
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn begin(&self) -> Result<DatabaseTransaction, AppError> {
        Ok(self.db.begin().await?)
    }

    async fn migrate(&self) -> Result<(), AppError> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);

        create_table(&self.db, &schema, plan::Entity).await?;
        create_table(&self.db, &schema, step::Entity).await?;
        create_table(&self.db, &schema, goal::Entity).await?;
        create_table(&self.db, &schema, session_binding::Entity).await?;

        let mut steps_by_plan = Index::create()
            .name("idx_steps_plan_position")
            .table(step::Entity)
            .col(step::Column::PlanId)
            .col(step::Column::Position)
            .to_owned();
        steps_by_plan.if_not_exists();
        self.db.execute(backend.build(&steps_by_plan)).await?;

        let mut goals_by_step = Index::create()
            .name("idx_goals_step")
            .table(goal::Entity)
            .col(goal::Column::StepId)
            .to_owned();
        goals_by_step.if_not_exists();
        self.db.execute(backend.build(&goals_by_step)).await?;

        Ok(())
    }
}

async fn create_table<E: EntityTrait>(
    db: &DatabaseConnection,
    schema: &Schema,
    entity: E,
) -> Result<(), AppError> {
    let backend = db.get_database_backend();
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await?;
    Ok(())
}

async fn connect(path: &Path) -> Result<DatabaseConnection, AppError> {
    let mut url = Url::from_file_path(path).map_err(|_| {
        AppError::Unavailable(format!("invalid sqlite path: {}", path.display()))
    })?;
    url.set_query(Some("mode=rwc"));
    let sqlite_url = url.as_str().replacen("file://", "sqlite://", 1);

    let mut options = ConnectOptions::new(sqlite_url);
    options.sqlx_logging(false);
    Database::connect(options).await.map_err(|err| {
        AppError::Unavailable(format!("cannot open store {}: {err}", path.display()))
    })
}

/// Commits on success, rolls back on failure. A failed rollback is logged
/// and the original error wins.
pub async fn finish<T>(
    txn: DatabaseTransaction,
    result: Result<T, AppError>,
) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                error!(error = %rollback_err, "rollback failed");
            }
            debug!(error = %err, "transaction rolled back");
            Err(err)
        }
    }
}


#[cfg(test)]
mod tests {
    use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};

    use super::test_support::temp_store;
    use super::*;

    #[tokio::test]
    async fn reopening_keeps_schema_and_rows() {
        let (dir, store) = temp_store().await;
        store
            .conn()
            .execute(Statement::from_string(
                DatabaseBackend::Sqlite,
                "INSERT INTO plans (title, content, status, created_at, updated_at) \
                 VALUES ('t', 'c', 'todo', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            ))
            .await
            .expect("insert");
        drop(store);

        let path = crate::config::Workspace::at(dir.path()).store_path();
        let reopened = Store::open(&path).await.expect("reopen");
        let plans = plan::Entity::find().all(reopened.conn()).await.expect("plans");
        assert_eq!(plans.len(), 1);
    }

    #[tokio::test]
    async fn deleted_ids_are_not_reused() {
        let (_dir, store) = temp_store().await;
        let insert = "INSERT INTO plans (title, content, status, created_at, updated_at) \
                      VALUES ('t', 'c', 'todo', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')";
        let conn = store.conn();
        conn.execute(Statement::from_string(DatabaseBackend::Sqlite, insert))
            .await
            .expect("first insert");
        plan::Entity::delete_by_id(1).exec(conn).await.expect("delete");
        conn.execute(Statement::from_string(DatabaseBackend::Sqlite, insert))
            .await
            .expect("second insert");

        let plans = plan::Entity::find().all(conn).await.expect("plans");
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].id, 2);
    }
}
