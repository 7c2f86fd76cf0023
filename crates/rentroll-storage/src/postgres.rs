use async_trait::async_trait;
use rentroll_core::{
    ContractKey, Facility, FacilityId, NewFacility, NewRentalContract, NewRentalInvoice, NewTenant,
    NewUnit, RentRollUnitKey, RentalContract, RentalContractId, RentalInvoice, RentalInvoiceId,
    Tenant, TenantId, TenantKey, Unit, UnitId, UnitKey,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;

use crate::{ImportSession, Store, StoreError};

const UNIT_COLUMNS: &str = "u.unit_id, u.facility_id, u.number, u.unit_width, u.unit_length, \
     u.unit_height, u.unit_type, u.monthly_rent";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn ImportSession>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSession { tx }))
    }
}

struct PgSession {
    tx: Transaction<'static, Postgres>,
}

fn map_write_error(err: sqlx::Error, key: impl FnOnce() -> String) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::UniqueViolation {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
                key: key(),
            };
        }
    }
    StoreError::Database(err)
}

fn ensure_found(rows_affected: u64, entity: &'static str, id: i64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        return Err(StoreError::NotFound { entity, id });
    }
    Ok(())
}

fn facility_from_row(row: &PgRow) -> Result<Facility, sqlx::Error> {
    Ok(Facility {
        id: FacilityId(row.try_get("facility_id")?),
        name: row.try_get("name")?,
    })
}

fn unit_from_row(row: &PgRow) -> Result<Unit, sqlx::Error> {
    Ok(Unit {
        id: UnitId(row.try_get("unit_id")?),
        facility_id: FacilityId(row.try_get("facility_id")?),
        number: row.try_get("number")?,
        width: row.try_get("unit_width")?,
        length: row.try_get("unit_length")?,
        height: row.try_get("unit_height")?,
        unit_type: row.try_get("unit_type")?,
        monthly_rent: row.try_get("monthly_rent")?,
    })
}

fn tenant_from_row(row: &PgRow) -> Result<Tenant, sqlx::Error> {
    Ok(Tenant {
        id: TenantId(row.try_get("tenant_id")?),
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
    })
}

fn contract_from_row(row: &PgRow) -> Result<RentalContract, sqlx::Error> {
    Ok(RentalContract {
        id: RentalContractId(row.try_get("rental_contract_id")?),
        unit_id: UnitId(row.try_get("unit_id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        current_amount_owed: row.try_get("current_amount_owed")?,
    })
}

fn invoice_from_row(row: &PgRow) -> Result<RentalInvoice, sqlx::Error> {
    Ok(RentalInvoice {
        id: RentalInvoiceId(row.try_get("rental_invoice_id")?),
        contract_id: RentalContractId(row.try_get("rental_contract_id")?),
        due_date: row.try_get("invoice_due_date")?,
        amount: row.try_get("invoice_amount")?,
        balance: row.try_get("invoice_balance")?,
    })
}

#[async_trait]
impl ImportSession for PgSession {
    async fn find_facility_by_name(&mut self, name: &str) -> Result<Option<Facility>, StoreError> {
        let row = sqlx::query("SELECT facility_id, name FROM facility WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.as_ref().map(facility_from_row).transpose()?)
    }

    async fn insert_facility(&mut self, new: NewFacility) -> Result<Facility, StoreError> {
        let row = sqlx::query("INSERT INTO facility (name) VALUES ($1) RETURNING facility_id, name")
            .bind(&new.name)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|err| map_write_error(err, || new.name.clone()))?;
        Ok(facility_from_row(&row)?)
    }

    async fn find_unit(&mut self, key: &UnitKey) -> Result<Option<Unit>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {UNIT_COLUMNS} FROM unit u WHERE u.number = $1 AND u.facility_id = $2"
        ))
        .bind(&key.number)
        .bind(key.facility_id.0)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.as_ref().map(unit_from_row).transpose()?)
    }

    async fn find_unit_by_facility_name(
        &mut self,
        key: &RentRollUnitKey,
    ) -> Result<Option<(Unit, Facility)>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {UNIT_COLUMNS}, f.name
              FROM unit u
              JOIN facility f ON f.facility_id = u.facility_id
             WHERE u.number = $1
               AND LOWER(TRIM(f.name)) = $2
             ORDER BY u.unit_id
             LIMIT 1
            "#
        ))
        .bind(&key.number)
        .bind(&key.facility_name)
        .fetch_optional(&mut *self.tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let unit = unit_from_row(&row)?;
        let facility = Facility {
            id: unit.facility_id,
            name: row.try_get("name")?,
        };
        Ok(Some((unit, facility)))
    }

    async fn insert_unit(&mut self, new: NewUnit) -> Result<Unit, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO unit (facility_id, number, unit_width, unit_length, unit_height, unit_type, monthly_rent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING unit_id, facility_id, number, unit_width, unit_length, unit_height, unit_type, monthly_rent
            "#,
        )
        .bind(new.facility_id.0)
        .bind(&new.number)
        .bind(new.width)
        .bind(new.length)
        .bind(new.height)
        .bind(&new.unit_type)
        .bind(new.monthly_rent)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|err| map_write_error(err, || format!("({}, {})", new.number, new.facility_id)))?;
        Ok(unit_from_row(&row)?)
    }

    async fn update_unit(&mut self, unit: &Unit) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE unit
               SET facility_id = $2, number = $3, unit_width = $4, unit_length = $5,
                   unit_height = $6, unit_type = $7, monthly_rent = $8
             WHERE unit_id = $1
            "#,
        )
        .bind(unit.id.0)
        .bind(unit.facility_id.0)
        .bind(&unit.number)
        .bind(unit.width)
        .bind(unit.length)
        .bind(unit.height)
        .bind(&unit.unit_type)
        .bind(unit.monthly_rent)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| {
            map_write_error(err, || format!("({}, {})", unit.number, unit.facility_id))
        })?;
        ensure_found(result.rows_affected(), "unit", unit.id.0)
    }

    async fn find_tenant(&mut self, key: &TenantKey) -> Result<Option<Tenant>, StoreError> {
        let query = match key {
            TenantKey::Email(email) => sqlx::query(
                r#"
                SELECT tenant_id, first_name, last_name, email, phone
                  FROM tenant
                 WHERE email = $1
                 ORDER BY tenant_id
                 LIMIT 1
                "#,
            )
            .bind(email),
            TenantKey::Name {
                first_name,
                last_name,
                phone,
            } => sqlx::query(
                r#"
                SELECT tenant_id, first_name, last_name, email, phone
                  FROM tenant
                 WHERE first_name = $1
                   AND last_name = $2
                   AND ($3::text IS NULL OR phone = $3)
                 ORDER BY tenant_id
                 LIMIT 1
                "#,
            )
            .bind(first_name)
            .bind(last_name)
            .bind(phone.as_deref()),
        };
        let row = query.fetch_optional(&mut *self.tx).await?;
        Ok(row.as_ref().map(tenant_from_row).transpose()?)
    }

    async fn insert_tenant(&mut self, new: NewTenant) -> Result<Tenant, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO tenant (first_name, last_name, email, phone)
            VALUES ($1, $2, $3, $4)
            RETURNING tenant_id, first_name, last_name, email, phone
            "#,
        )
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(new.email.as_deref())
        .bind(new.phone.as_deref())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(tenant_from_row(&row)?)
    }

    async fn update_tenant(&mut self, tenant: &Tenant) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tenant
               SET first_name = $2, last_name = $3, email = $4, phone = $5
             WHERE tenant_id = $1
            "#,
        )
        .bind(tenant.id.0)
        .bind(&tenant.first_name)
        .bind(&tenant.last_name)
        .bind(tenant.email.as_deref())
        .bind(tenant.phone.as_deref())
        .execute(&mut *self.tx)
        .await?;
        ensure_found(result.rows_affected(), "tenant", tenant.id.0)
    }

    async fn find_contract(
        &mut self,
        key: &ContractKey,
    ) -> Result<Option<RentalContract>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT rental_contract_id, unit_id, tenant_id, start_date, end_date, current_amount_owed
              FROM rental_contract
             WHERE unit_id = $1 AND tenant_id = $2 AND start_date = $3
             ORDER BY rental_contract_id
             LIMIT 1
            "#,
        )
        .bind(key.unit_id.0)
        .bind(key.tenant_id.0)
        .bind(key.start_date)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.as_ref().map(contract_from_row).transpose()?)
    }

    async fn insert_contract(
        &mut self,
        new: NewRentalContract,
    ) -> Result<RentalContract, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO rental_contract (unit_id, tenant_id, start_date, end_date, current_amount_owed)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING rental_contract_id, unit_id, tenant_id, start_date, end_date, current_amount_owed
            "#,
        )
        .bind(new.unit_id.0)
        .bind(new.tenant_id.0)
        .bind(new.start_date)
        .bind(new.end_date)
        .bind(new.current_amount_owed)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(contract_from_row(&row)?)
    }

    async fn update_contract(&mut self, contract: &RentalContract) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE rental_contract
               SET unit_id = $2, tenant_id = $3, start_date = $4, end_date = $5,
                   current_amount_owed = $6
             WHERE rental_contract_id = $1
            "#,
        )
        .bind(contract.id.0)
        .bind(contract.unit_id.0)
        .bind(contract.tenant_id.0)
        .bind(contract.start_date)
        .bind(contract.end_date)
        .bind(contract.current_amount_owed)
        .execute(&mut *self.tx)
        .await?;
        ensure_found(result.rows_affected(), "rental contract", contract.id.0)
    }

    async fn invoices_for_contract(
        &mut self,
        contract_id: RentalContractId,
    ) -> Result<Vec<RentalInvoice>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT rental_invoice_id, rental_contract_id, invoice_due_date, invoice_amount, invoice_balance
              FROM rental_invoice
             WHERE rental_contract_id = $1
             ORDER BY rental_invoice_id
            "#,
        )
        .bind(contract_id.0)
        .fetch_all(&mut *self.tx)
        .await?;
        let invoices = rows
            .iter()
            .map(invoice_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(invoices)
    }

    async fn insert_invoice(&mut self, new: NewRentalInvoice) -> Result<RentalInvoice, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO rental_invoice (rental_contract_id, invoice_due_date, invoice_amount, invoice_balance)
            VALUES ($1, $2, $3, $4)
            RETURNING rental_invoice_id, rental_contract_id, invoice_due_date, invoice_amount, invoice_balance
            "#,
        )
        .bind(new.contract_id.0)
        .bind(new.due_date)
        .bind(new.amount)
        .bind(new.balance)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|err| {
            map_write_error(err, || format!("({}, {})", new.contract_id, new.due_date))
        })?;
        Ok(invoice_from_row(&row)?)
    }

    async fn update_invoice(&mut self, invoice: &RentalInvoice) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE rental_invoice
               SET invoice_due_date = $2, invoice_amount = $3, invoice_balance = $4
             WHERE rental_invoice_id = $1
            "#,
        )
        .bind(invoice.id.0)
        .bind(invoice.due_date)
        .bind(invoice.amount)
        .bind(invoice.balance)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| {
            map_write_error(err, || format!("({}, {})", invoice.contract_id, invoice.due_date))
        })?;
        ensure_found(result.rows_affected(), "rental invoice", invoice.id.0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
