use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;

use turnero_core::booking::{ClientDirectory, GatewayError};
use turnero_core::domain::client::{Client, ClientId};

use super::{column, parse_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlClientDirectory {
    pool: DbPool,
}

impl SqlClientDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn select(&self, id: &ClientId) -> Result<Option<Client>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, channel_address, email, created_at FROM client WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_client).transpose()
    }
}

fn row_to_client(row: &SqliteRow) -> Result<Client, RepositoryError> {
    let created_at: String = column(row, "created_at")?;
    Ok(Client {
        id: ClientId(column(row, "id")?),
        name: column(row, "name")?,
        channel_address: column(row, "channel_address")?,
        email: column(row, "email")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait]
impl ClientDirectory for SqlClientDirectory {
    async fn find(&self, id: &ClientId) -> Result<Option<Client>, GatewayError> {
        Ok(self.select(id).await?)
    }

    async fn register(&self, client: Client) -> Result<Client, GatewayError> {
        sqlx::query(
            "INSERT INTO client (id, name, channel_address, email, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&client.id.0)
        .bind(&client.name)
        .bind(&client.channel_address)
        .bind(&client.email)
        .bind(client.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(client)
    }

    async fn set_email(&self, id: &ClientId, email: &str) -> Result<Client, GatewayError> {
        let result = sqlx::query("UPDATE client SET email = ? WHERE id = ?")
            .bind(email)
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(format!("client `{}`", id.0)));
        }

        self.select(id).await?.ok_or_else(|| GatewayError::NotFound(format!("client `{}`", id.0)))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use turnero_core::booking::{ClientDirectory, GatewayError};
    use turnero_core::domain::client::{Client, ClientId};

    use super::SqlClientDirectory;
    use crate::{connect_with_settings, migrations};

    async fn directory() -> SqlClientDirectory {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlClientDirectory::new(pool)
    }

    fn client(id: &str) -> Client {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("timestamp");
        Client::register(ClientId(id.to_string()), "Lucia Gomez", "5491133334444", now)
            .expect("valid client")
    }

    #[tokio::test]
    async fn register_then_find() {
        let directory = directory().await;
        directory.register(client("28999888")).await.expect("register");

        let found = directory
            .find(&ClientId("28999888".to_string()))
            .await
            .expect("find")
            .expect("client exists");
        assert_eq!(found, client("28999888"));
        assert!(found.email.is_none());
    }

    #[tokio::test]
    async fn second_registration_of_same_key_conflicts() {
        let directory = directory().await;
        directory.register(client("28999888")).await.expect("register");

        let error = directory.register(client("28999888")).await.expect_err("duplicate key");
        assert!(matches!(error, GatewayError::Conflict(_)));
    }

    #[tokio::test]
    async fn set_email_fills_the_optional_field() {
        let directory = directory().await;
        directory.register(client("28999888")).await.expect("register");

        let updated = directory
            .set_email(&ClientId("28999888".to_string()), "lucia@example.com")
            .await
            .expect("set email");
        assert_eq!(updated.email.as_deref(), Some("lucia@example.com"));
        assert_eq!(updated.name, "Lucia Gomez");

        let missing = directory
            .set_email(&ClientId("11111111".to_string()), "x@example.com")
            .await
            .expect_err("unknown client");
        assert!(matches!(missing, GatewayError::NotFound(_)));
    }
}
