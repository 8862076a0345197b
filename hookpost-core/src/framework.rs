use sqlx::PgPool;

/// Executes the SQL processors defined next to each entity.
#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}
