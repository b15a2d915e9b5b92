use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use super::raw::{RawRecord, TIME_FIELD};

pub const SYNCED: &str = "synced";
pub const DEFAULT_ELIGIBILITY_FIELD: &str = "sync_status";
const SYNC_STATUS_FIELD: &str = "syncStatus";
const IMAGE_FIELD: &str = "imageUrl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Tickets,
    Expenses,
    Mileage,
    Trucks,
    Users,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Tickets,
        EntityKind::Expenses,
        EntityKind::Mileage,
        EntityKind::Trucks,
        EntityKind::Users,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Tickets => "tickets",
            EntityKind::Expenses => "expenses",
            EntityKind::Mileage => "mileage",
            EntityKind::Trucks => "trucks",
            EntityKind::Users => "users",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("required field `{0}` is missing or blank")]
    MissingField(&'static str),
}

/// Values the normalizers need besides the payload itself, so they stay pure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemContext {
    pub id: String,
    pub now_ms: i64,
}

pub trait SyncRow: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn last_touched(&self) -> i64;
}

pub type Normalizer<R> = fn(&RawRecord, &ItemContext) -> R;
pub type RawValidator = fn(&RawRecord) -> Result<(), ValidationError>;
pub type RowValidator<R> = fn(&R) -> Result<(), ValidationError>;

#[derive(Clone)]
pub struct EntitySyncConfig<R> {
    pub kind: EntityKind,
    pub path: String,
    pub eligibility_field: String,
    pub image_field: Option<&'static str>,
    pub validate: Option<RawValidator>,
    pub validate_row: Option<RowValidator<R>>,
    pub normalize: Normalizer<R>,
}

impl<R> EntitySyncConfig<R> {
    fn new(kind: EntityKind, normalize: Normalizer<R>) -> Self {
        Self {
            kind,
            path: kind.as_str().to_string(),
            eligibility_field: DEFAULT_ELIGIBILITY_FIELD.to_string(),
            image_field: None,
            validate: None,
            validate_row: None,
            normalize,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_eligibility_field(mut self, field: impl Into<String>) -> Self {
        self.eligibility_field = field.into();
        self
    }
}

impl EntitySyncConfig<TicketRow> {
    pub fn tickets() -> Self {
        Self {
            image_field: Some(IMAGE_FIELD),
            ..Self::new(EntityKind::Tickets, normalize_ticket)
        }
    }
}

impl EntitySyncConfig<ExpenseRow> {
    pub fn expenses() -> Self {
        Self {
            image_field: Some(IMAGE_FIELD),
            ..Self::new(EntityKind::Expenses, normalize_expense)
        }
    }
}

impl EntitySyncConfig<MileageRow> {
    pub fn mileage() -> Self {
        Self {
            image_field: Some(IMAGE_FIELD),
            ..Self::new(EntityKind::Mileage, normalize_mileage)
        }
    }
}

impl EntitySyncConfig<TruckRow> {
    pub fn trucks() -> Self {
        Self {
            validate: Some(validate_truck_payload),
            validate_row: Some(validate_truck_row),
            ..Self::new(EntityKind::Trucks, normalize_truck)
        }
    }
}

impl EntitySyncConfig<UserRow> {
    pub fn users() -> Self {
        Self::new(EntityKind::Users, normalize_user)
    }
}

/// The five mirrored kinds, each with its own row type.
#[derive(Clone)]
pub struct SyncConfigs {
    pub tickets: EntitySyncConfig<TicketRow>,
    pub expenses: EntitySyncConfig<ExpenseRow>,
    pub mileage: EntitySyncConfig<MileageRow>,
    pub trucks: EntitySyncConfig<TruckRow>,
    pub users: EntitySyncConfig<UserRow>,
}

impl Default for SyncConfigs {
    fn default() -> Self {
        Self {
            tickets: EntitySyncConfig::tickets(),
            expenses: EntitySyncConfig::expenses(),
            mileage: EntitySyncConfig::mileage(),
            trucks: EntitySyncConfig::trucks(),
            users: EntitySyncConfig::users(),
        }
    }
}

impl SyncConfigs {
    pub fn set_eligibility_field(&mut self, kind: EntityKind, field: &str) {
        let field = field.to_string();
        match kind {
            EntityKind::Tickets => self.tickets.eligibility_field = field,
            EntityKind::Expenses => self.expenses.eligibility_field = field,
            EntityKind::Mileage => self.mileage.eligibility_field = field,
            EntityKind::Trucks => self.trucks.eligibility_field = field,
            EntityKind::Users => self.users.eligibility_field = field,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TicketRow {
    pub id: String,
    pub nom: String,
    pub doc_type: String,
    pub file_url: Option<String>,
    pub driver_id: Option<String>,
    pub expiration_date: Option<String>,
    pub ticket_num: Option<String>,
    pub date_entree: Option<i64>,
    pub date_sortie: Option<i64>,
    pub truck_id: Option<String>,
    pub product: Option<String>,
    pub net_weight: Option<f64>,
    pub extra_data: String,
    pub sync_status: String,
    pub last_touched: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseRow {
    pub id: String,
    pub driver_id: Option<String>,
    pub expense_type: String,
    pub entry_type: String,
    pub date: Option<String>,
    pub quantity: Option<f64>,
    pub amount: f64,
    pub description: Option<String>,
    pub location: Option<String>,
    pub payment_method: Option<String>,
    pub image_url: Option<String>,
    pub sync_status: String,
    pub last_touched: i64,
    pub admin_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MileageRow {
    pub id: String,
    pub truck_id: Option<String>,
    pub driver_id: Option<String>,
    pub date: Option<String>,
    pub kilometers: Option<f64>,
    pub image_url: Option<String>,
    pub sync_status: String,
    pub extra_data: String,
    pub last_touched: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TruckRow {
    pub id: String,
    pub name: String,
    pub truck_type: String,
    pub registration: Option<String>,
    pub sync_status: String,
    pub last_touched: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub role: String,
    pub license_number: Option<String>,
    pub license_issue_place: Option<String>,
    pub license_issue_date: Option<String>,
    pub license_expiry_date: Option<String>,
    pub auth_token: Option<String>,
    pub sync_status: String,
    pub last_touched: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

macro_rules! impl_sync_row {
    ($($row:ty),+ $(,)?) => {
        $(impl SyncRow for $row {
            fn id(&self) -> &str {
                &self.id
            }

            fn last_touched(&self) -> i64 {
                self.last_touched
            }
        })+
    };
}

impl_sync_row!(TicketRow, ExpenseRow, MileageRow, TruckRow, UserRow);

fn fallback(kind: EntityKind, id: &str, field: &'static str, value: impl fmt::Display) {
    warn!(kind = %kind, id, field, fallback = %value, "field missing; using fallback");
}

fn sync_status(raw: &RawRecord) -> String {
    raw.text(SYNC_STATUS_FIELD)
        .unwrap_or_else(|| SYNCED.to_string())
}

pub(crate) fn last_touched(raw: &RawRecord, ctx: &ItemContext) -> i64 {
    raw.timestamp(TIME_FIELD).unwrap_or(ctx.now_ms)
}

pub fn normalize_ticket(raw: &RawRecord, ctx: &ItemContext) -> TicketRow {
    let ticket_num = raw.text("ticketNum");
    let nom = raw.text("nom").unwrap_or_else(|| {
        let nom = format!("Ticket_{}", ticket_num.as_deref().unwrap_or(&ctx.id));
        fallback(EntityKind::Tickets, &ctx.id, "nom", &nom);
        nom
    });
    let doc_type = raw.text("type").unwrap_or_else(|| {
        fallback(EntityKind::Tickets, &ctx.id, "type", "ticket");
        "ticket".to_string()
    });
    let driver_id = raw.text("driver");
    if driver_id.is_none() {
        fallback(EntityKind::Tickets, &ctx.id, "driver", "null");
    }

    TicketRow {
        id: ctx.id.clone(),
        nom,
        doc_type,
        file_url: raw.text(IMAGE_FIELD),
        driver_id,
        expiration_date: raw.text("expirationDate"),
        ticket_num,
        date_entree: raw.timestamp("dateEntree"),
        date_sortie: raw.timestamp("dateSortie"),
        truck_id: raw.text("truck"),
        product: raw.text("product"),
        net_weight: raw.number("netWeight"),
        extra_data: raw.json_text("extraData").unwrap_or_else(|| "{}".to_string()),
        sync_status: sync_status(raw),
        last_touched: last_touched(raw, ctx),
    }
}

pub fn normalize_expense(raw: &RawRecord, ctx: &ItemContext) -> ExpenseRow {
    let amount = raw.number("amount").unwrap_or_else(|| {
        fallback(EntityKind::Expenses, &ctx.id, "amount", 0);
        0.0
    });
    let expense_type = raw.text("type").unwrap_or_else(|| {
        fallback(EntityKind::Expenses, &ctx.id, "type", "other");
        "other".to_string()
    });

    ExpenseRow {
        id: ctx.id.clone(),
        driver_id: raw.text("driver"),
        expense_type,
        entry_type: raw
            .text("entryType")
            .unwrap_or_else(|| "expense".to_string()),
        date: raw.text("date"),
        quantity: raw.number("quantity"),
        amount,
        description: raw.text("description"),
        location: raw.text("location"),
        payment_method: raw.text("paymentMethod"),
        image_url: raw.text(IMAGE_FIELD),
        sync_status: sync_status(raw),
        last_touched: last_touched(raw, ctx),
        admin_id: raw.text("adminId"),
    }
}

pub fn normalize_mileage(raw: &RawRecord, ctx: &ItemContext) -> MileageRow {
    let kilometers = raw.number("km");
    if kilometers.is_none() {
        fallback(EntityKind::Mileage, &ctx.id, "km", "null");
    }

    MileageRow {
        id: ctx.id.clone(),
        truck_id: raw.text("truck"),
        driver_id: raw.text("driver"),
        date: raw.text("date"),
        kilometers,
        image_url: raw.text(IMAGE_FIELD),
        sync_status: sync_status(raw),
        extra_data: raw.json_text("extraData").unwrap_or_else(|| "{}".to_string()),
        last_touched: last_touched(raw, ctx),
    }
}

/// Leaves `name`/`type` blank when absent; [`validate_truck_row`] rejects those.
pub fn normalize_truck(raw: &RawRecord, ctx: &ItemContext) -> TruckRow {
    let last_touched = last_touched(raw, ctx);

    TruckRow {
        id: ctx.id.clone(),
        name: raw.text("name").unwrap_or_default(),
        truck_type: raw.text("type").unwrap_or_default(),
        registration: raw.text("registration"),
        sync_status: sync_status(raw),
        last_touched,
        created_at: raw.timestamp("createdAt").unwrap_or(last_touched),
        updated_at: raw.timestamp("updatedAt").unwrap_or(last_touched),
    }
}

pub fn normalize_user(raw: &RawRecord, ctx: &ItemContext) -> UserRow {
    let email = raw.text("email");
    let name = raw.text("name").unwrap_or_else(|| {
        let name = email.clone().unwrap_or_else(|| format!("User_{}", ctx.id));
        fallback(EntityKind::Users, &ctx.id, "name", &name);
        name
    });
    let role = raw.text("role").unwrap_or_else(|| {
        fallback(EntityKind::Users, &ctx.id, "role", "driver");
        "driver".to_string()
    });
    let last_touched = last_touched(raw, ctx);

    UserRow {
        id: ctx.id.clone(),
        name,
        email,
        role,
        license_number: raw.text("licenseNumber"),
        license_issue_place: raw.text("licenseIssuePlace"),
        license_issue_date: raw.text("licenseIssueDate"),
        license_expiry_date: raw.text("licenseExpiryDate"),
        auth_token: raw.text("token"),
        sync_status: sync_status(raw),
        last_touched,
        created_at: raw.timestamp("createdAt").unwrap_or(last_touched),
        updated_at: raw.timestamp("updatedAt").unwrap_or(last_touched),
    }
}

pub fn validate_truck_payload(raw: &RawRecord) -> Result<(), ValidationError> {
    if raw.text("name").is_none() {
        return Err(ValidationError::MissingField("name"));
    }
    if raw.text("type").is_none() {
        return Err(ValidationError::MissingField("type"));
    }
    Ok(())
}

pub fn validate_truck_row(row: &TruckRow) -> Result<(), ValidationError> {
    if row.name.trim().is_empty() {
        return Err(ValidationError::MissingField("name"));
    }
    if row.truck_type.trim().is_empty() {
        return Err(ValidationError::MissingField("type"));
    }
    Ok(())
}
