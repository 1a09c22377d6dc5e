use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};

use crate::models::{FoodLog, NutritionRecord};

/// Storage for analysed meals. The analysis flow never depends on it succeeding.
#[async_trait::async_trait]
pub trait FoodLogStore: Send + Sync {
    async fn add_food_log(&self, log: &FoodLog) -> Result<i64>;
    async fn get_food_log(&self, id: i64) -> Result<Option<FoodLog>>;
    /// Most recent logs for a user, newest first.
    async fn get_history(&self, user_id: &str, limit: i64) -> Result<Vec<FoodLog>>;
}

pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let db = Database { pool };
        db.init_tables().await?;
        Ok(db)
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS food_logs (
                id BIGSERIAL PRIMARY KEY,
                user_id TEXT NOT NULL,
                food_name TEXT NOT NULL,
                calories BIGINT NOT NULL,
                protein_g DOUBLE PRECISION NOT NULL,
                carbs_g DOUBLE PRECISION NOT NULL,
                fats_g DOUBLE PRECISION NOT NULL,
                confidence DOUBLE PRECISION NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS food_logs_user_recent ON food_logs (user_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn food_log_from_row(row: &PgRow) -> FoodLog {
    let nutrition = NutritionRecord {
        food_name: row.get(2),
        calories: row.get(3),
        protein_g: row.get(4),
        carbs_g: row.get(5),
        fats_g: row.get(6),
        confidence: row.get(7),
    };

    FoodLog {
        id: Some(row.get(0)),
        user_id: row.get(1),
        food_name: nutrition.food_name.clone(),
        calories: nutrition.calories,
        nutrition,
        timestamp: row.get(8),
    }
}

#[async_trait::async_trait]
impl FoodLogStore for Database {
    async fn add_food_log(&self, log: &FoodLog) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO food_logs (user_id, food_name, calories, protein_g, carbs_g, fats_g, confidence, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&log.user_id)
        .bind(&log.nutrition.food_name)
        .bind(log.nutrition.calories)
        .bind(log.nutrition.protein_g)
        .bind(log.nutrition.carbs_g)
        .bind(log.nutrition.fats_g)
        .bind(log.nutrition.confidence)
        .bind(log.timestamp)
        .fetch_one(&self.pool)
        .await?;

        Ok(result.get(0))
    }

    async fn get_food_log(&self, id: i64) -> Result<Option<FoodLog>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, food_name, calories, protein_g, carbs_g, fats_g, confidence, created_at
            FROM food_logs WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(food_log_from_row))
    }

    async fn get_history(&self, user_id: &str, limit: i64) -> Result<Vec<FoodLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, food_name, calories, protein_g, carbs_g, fats_g, confidence, created_at
            FROM food_logs
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(food_log_from_row).collect())
    }
}

/// In-memory store for handler and API tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    logs: tokio::sync::Mutex<Vec<FoodLog>>,
    fail_writes: bool,
}

#[cfg(test)]
impl MemoryStore {
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl FoodLogStore for MemoryStore {
    async fn add_food_log(&self, log: &FoodLog) -> Result<i64> {
        if self.fail_writes {
            anyhow::bail!("database unavailable");
        }
        let mut logs = self.logs.lock().await;
        let id = logs.len() as i64 + 1;
        logs.push(FoodLog {
            id: Some(id),
            ..log.clone()
        });
        Ok(id)
    }

    async fn get_food_log(&self, id: i64) -> Result<Option<FoodLog>> {
        let logs = self.logs.lock().await;
        Ok(logs.iter().find(|log| log.id == Some(id)).cloned())
    }

    async fn get_history(&self, user_id: &str, limit: i64) -> Result<Vec<FoodLog>> {
        let logs = self.logs.lock().await;
        let mut history: Vec<FoodLog> = logs.iter().filter(|log| log.user_id == user_id).cloned().collect();
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        history.truncate(limit.max(0) as usize);
        Ok(history)
    }
}
