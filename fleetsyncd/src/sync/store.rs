use std::future::Future;
use std::{fs, path::PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool, migrate::Migrator};
use thiserror::Error;

use super::entities::{ExpenseRow, MileageRow, TicketRow, TruckRow, UserRow};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Stored rows that predate the sync layer may have no touch time; they
/// compare as the epoch.
const UNTOUCHED: i64 = 0;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
}

/// One table of normalized rows, keyed by `id`.
pub trait RecordStore<R>: Send + Sync {
    fn upsert(&self, row: &R) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn find_by_id(&self, id: &str) -> impl Future<Output = Result<Option<R>, StoreError>> + Send;

    /// Returns whether a row was deleted.
    fn destroy(&self, id: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// A store holding all five mirrored tables.
pub trait FleetStore:
    RecordStore<TicketRow>
    + RecordStore<ExpenseRow>
    + RecordStore<MileageRow>
    + RecordStore<TruckRow>
    + RecordStore<UserRow>
    + 'static
{
}

impl<T> FleetStore for T where
    T: RecordStore<TicketRow>
        + RecordStore<ExpenseRow>
        + RecordStore<MileageRow>
        + RecordStore<TruckRow>
        + RecordStore<UserRow>
        + 'static
{
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let options = database_url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true);
        if let Some(parent) = options.get_filename().parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Single-connection in-memory database, handy for tests and dry runs.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn count(&self, table: &str) -> Result<i64, StoreError> {
        let table = match table {
            "tickets" | "expenses" | "mileage" | "trucks" | "users" => table,
            _ => return Ok(0),
        };
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    async fn delete_from(&self, table: &str, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = ?1"))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub fn default_database_url() -> Result<String, StoreError> {
    let mut path: PathBuf = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("fleetsync");
    path.push("fleet.db");
    Ok(format!("sqlite://{}", path.display()))
}

fn touched(row: &SqliteRow) -> Result<i64, sqlx::Error> {
    let value: Option<i64> = row.try_get("last_touched")?;
    Ok(value.unwrap_or(UNTOUCHED))
}

impl RecordStore<TicketRow> for SqliteStore {
    async fn upsert(&self, row: &TicketRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tickets (
                id, nom, doc_type, file_url, driver_id, expiration_date, ticket_num,
                date_entree, date_sortie, truck_id, product, net_weight, extra_data,
                sync_status, last_touched
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(id) DO UPDATE SET
                nom = excluded.nom,
                doc_type = excluded.doc_type,
                file_url = excluded.file_url,
                driver_id = excluded.driver_id,
                expiration_date = excluded.expiration_date,
                ticket_num = excluded.ticket_num,
                date_entree = excluded.date_entree,
                date_sortie = excluded.date_sortie,
                truck_id = excluded.truck_id,
                product = excluded.product,
                net_weight = excluded.net_weight,
                extra_data = excluded.extra_data,
                sync_status = excluded.sync_status,
                last_touched = excluded.last_touched",
        )
        .bind(&row.id)
        .bind(&row.nom)
        .bind(&row.doc_type)
        .bind(&row.file_url)
        .bind(&row.driver_id)
        .bind(&row.expiration_date)
        .bind(&row.ticket_num)
        .bind(row.date_entree)
        .bind(row.date_sortie)
        .bind(&row.truck_id)
        .bind(&row.product)
        .bind(row.net_weight)
        .bind(&row.extra_data)
        .bind(&row.sync_status)
        .bind(row.last_touched)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TicketRow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, nom, doc_type, file_url, driver_id, expiration_date, ticket_num,
                    date_entree, date_sortie, truck_id, product, net_weight, extra_data,
                    sync_status, last_touched
             FROM tickets WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(TicketRow {
            id: row.try_get("id")?,
            nom: row.try_get("nom")?,
            doc_type: row.try_get("doc_type")?,
            file_url: row.try_get("file_url")?,
            driver_id: row.try_get("driver_id")?,
            expiration_date: row.try_get("expiration_date")?,
            ticket_num: row.try_get("ticket_num")?,
            date_entree: row.try_get("date_entree")?,
            date_sortie: row.try_get("date_sortie")?,
            truck_id: row.try_get("truck_id")?,
            product: row.try_get("product")?,
            net_weight: row.try_get("net_weight")?,
            extra_data: row.try_get("extra_data")?,
            sync_status: row.try_get("sync_status")?,
            last_touched: touched(&row)?,
        }))
    }

    async fn destroy(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_from("tickets", id).await
    }
}

impl RecordStore<ExpenseRow> for SqliteStore {
    async fn upsert(&self, row: &ExpenseRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO expenses (
                id, driver_id, expense_type, entry_type, date, quantity, amount,
                description, location, payment_method, image_url, sync_status,
                last_touched, admin_id
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
                driver_id = excluded.driver_id,
                expense_type = excluded.expense_type,
                entry_type = excluded.entry_type,
                date = excluded.date,
                quantity = excluded.quantity,
                amount = excluded.amount,
                description = excluded.description,
                location = excluded.location,
                payment_method = excluded.payment_method,
                image_url = excluded.image_url,
                sync_status = excluded.sync_status,
                last_touched = excluded.last_touched,
                admin_id = excluded.admin_id",
        )
        .bind(&row.id)
        .bind(&row.driver_id)
        .bind(&row.expense_type)
        .bind(&row.entry_type)
        .bind(&row.date)
        .bind(row.quantity)
        .bind(row.amount)
        .bind(&row.description)
        .bind(&row.location)
        .bind(&row.payment_method)
        .bind(&row.image_url)
        .bind(&row.sync_status)
        .bind(row.last_touched)
        .bind(&row.admin_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ExpenseRow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, driver_id, expense_type, entry_type, date, quantity, amount,
                    description, location, payment_method, image_url, sync_status,
                    last_touched, admin_id
             FROM expenses WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(ExpenseRow {
            id: row.try_get("id")?,
            driver_id: row.try_get("driver_id")?,
            expense_type: row.try_get("expense_type")?,
            entry_type: row.try_get("entry_type")?,
            date: row.try_get("date")?,
            quantity: row.try_get("quantity")?,
            amount: row.try_get("amount")?,
            description: row.try_get("description")?,
            location: row.try_get("location")?,
            payment_method: row.try_get("payment_method")?,
            image_url: row.try_get("image_url")?,
            sync_status: row.try_get("sync_status")?,
            last_touched: touched(&row)?,
            admin_id: row.try_get("admin_id")?,
        }))
    }

    async fn destroy(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_from("expenses", id).await
    }
}

impl RecordStore<MileageRow> for SqliteStore {
    async fn upsert(&self, row: &MileageRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO mileage (
                id, truck_id, driver_id, date, kilometers, image_url, sync_status,
                extra_data, last_touched
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                truck_id = excluded.truck_id,
                driver_id = excluded.driver_id,
                date = excluded.date,
                kilometers = excluded.kilometers,
                image_url = excluded.image_url,
                sync_status = excluded.sync_status,
                extra_data = excluded.extra_data,
                last_touched = excluded.last_touched",
        )
        .bind(&row.id)
        .bind(&row.truck_id)
        .bind(&row.driver_id)
        .bind(&row.date)
        .bind(row.kilometers)
        .bind(&row.image_url)
        .bind(&row.sync_status)
        .bind(&row.extra_data)
        .bind(row.last_touched)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<MileageRow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, truck_id, driver_id, date, kilometers, image_url, sync_status,
                    extra_data, last_touched
             FROM mileage WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(MileageRow {
            id: row.try_get("id")?,
            truck_id: row.try_get("truck_id")?,
            driver_id: row.try_get("driver_id")?,
            date: row.try_get("date")?,
            kilometers: row.try_get("kilometers")?,
            image_url: row.try_get("image_url")?,
            sync_status: row.try_get("sync_status")?,
            extra_data: row.try_get("extra_data")?,
            last_touched: touched(&row)?,
        }))
    }

    async fn destroy(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_from("mileage", id).await
    }
}

impl RecordStore<TruckRow> for SqliteStore {
    async fn upsert(&self, row: &TruckRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO trucks (
                id, name, truck_type, registration, sync_status, last_touched,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                truck_type = excluded.truck_type,
                registration = excluded.registration,
                sync_status = excluded.sync_status,
                last_touched = excluded.last_touched,
                updated_at = excluded.updated_at",
        )
        .bind(&row.id)
        .bind(&row.name)
        .bind(&row.truck_type)
        .bind(&row.registration)
        .bind(&row.sync_status)
        .bind(row.last_touched)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TruckRow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, truck_type, registration, sync_status, last_touched,
                    created_at, updated_at
             FROM trucks WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(TruckRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            truck_type: row.try_get("truck_type")?,
            registration: row.try_get("registration")?,
            sync_status: row.try_get("sync_status")?,
            last_touched: touched(&row)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn destroy(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_from("trucks", id).await
    }
}

impl RecordStore<UserRow> for SqliteStore {
    async fn upsert(&self, row: &UserRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (
                id, name, email, role, license_number, license_issue_place,
                license_issue_date, license_expiry_date, auth_token, sync_status,
                last_touched, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                role = excluded.role,
                license_number = excluded.license_number,
                license_issue_place = excluded.license_issue_place,
                license_issue_date = excluded.license_issue_date,
                license_expiry_date = excluded.license_expiry_date,
                auth_token = excluded.auth_token,
                sync_status = excluded.sync_status,
                last_touched = excluded.last_touched,
                updated_at = excluded.updated_at",
        )
        .bind(&row.id)
        .bind(&row.name)
        .bind(&row.email)
        .bind(&row.role)
        .bind(&row.license_number)
        .bind(&row.license_issue_place)
        .bind(&row.license_issue_date)
        .bind(&row.license_expiry_date)
        .bind(&row.auth_token)
        .bind(&row.sync_status)
        .bind(row.last_touched)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserRow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, email, role, license_number, license_issue_place,
                    license_issue_date, license_expiry_date, auth_token, sync_status,
                    last_touched, created_at, updated_at
             FROM users WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(UserRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            role: row.try_get("role")?,
            license_number: row.try_get("license_number")?,
            license_issue_place: row.try_get("license_issue_place")?,
            license_issue_date: row.try_get("license_issue_date")?,
            license_expiry_date: row.try_get("license_expiry_date")?,
            auth_token: row.try_get("auth_token")?,
            sync_status: row.try_get("sync_status")?,
            last_touched: touched(&row)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn destroy(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_from("users", id).await
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
