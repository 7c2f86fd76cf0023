//! Transactional storage contract for the importer, with in-memory and PostgreSQL backends.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rentroll_core::{
    normalize_facility_name, ContractKey, Facility, FacilityId, NewFacility, NewRentalContract,
    NewRentalInvoice, NewTenant, NewUnit, RentRollUnitKey, RentalContract, RentalContractId,
    RentalInvoice, RentalInvoiceId, Tenant, TenantId, TenantKey, Unit, UnitId, UnitKey,
};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

mod postgres;

pub use postgres::PgStore;

pub const CRATE_NAME: &str = "rentroll-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("unique constraint {constraint} violated by {key}")]
    UniqueViolation { constraint: String, key: String },
    #[error("{entity} {id} does not exist")]
    NotFound { entity: &'static str, id: i64 },
}

/// Entry point of the storage collaborator: hands out one transaction per call.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ImportSession>, StoreError>;
}

/// One open transaction.
///
/// `commit` and `rollback` consume the session so it is released exactly once.
/// Dropping a session without committing discards its writes.
#[async_trait]
pub trait ImportSession: Send {
    async fn find_facility_by_name(&mut self, name: &str) -> Result<Option<Facility>, StoreError>;
    async fn insert_facility(&mut self, new: NewFacility) -> Result<Facility, StoreError>;

    async fn find_unit(&mut self, key: &UnitKey) -> Result<Option<Unit>, StoreError>;
    /// Unit lookup used by the rent roll; returns the owning facility alongside.
    async fn find_unit_by_facility_name(
        &mut self,
        key: &RentRollUnitKey,
    ) -> Result<Option<(Unit, Facility)>, StoreError>;
    async fn insert_unit(&mut self, new: NewUnit) -> Result<Unit, StoreError>;
    async fn update_unit(&mut self, unit: &Unit) -> Result<(), StoreError>;

    async fn find_tenant(&mut self, key: &TenantKey) -> Result<Option<Tenant>, StoreError>;
    async fn insert_tenant(&mut self, new: NewTenant) -> Result<Tenant, StoreError>;
    async fn update_tenant(&mut self, tenant: &Tenant) -> Result<(), StoreError>;

    async fn find_contract(
        &mut self,
        key: &ContractKey,
    ) -> Result<Option<RentalContract>, StoreError>;
    async fn insert_contract(
        &mut self,
        new: NewRentalContract,
    ) -> Result<RentalContract, StoreError>;
    async fn update_contract(&mut self, contract: &RentalContract) -> Result<(), StoreError>;

    async fn invoices_for_contract(
        &mut self,
        contract_id: RentalContractId,
    ) -> Result<Vec<RentalInvoice>, StoreError>;
    async fn insert_invoice(&mut self, new: NewRentalInvoice) -> Result<RentalInvoice, StoreError>;
    async fn update_invoice(&mut self, invoice: &RentalInvoice) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Table contents of a [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub facilities: BTreeMap<FacilityId, Facility>,
    pub units: BTreeMap<UnitId, Unit>,
    pub tenants: BTreeMap<TenantId, Tenant>,
    pub contracts: BTreeMap<RentalContractId, RentalContract>,
    pub invoices: BTreeMap<RentalInvoiceId, RentalInvoice>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn invoices_of(&self, contract_id: RentalContractId) -> Vec<&RentalInvoice> {
        self.invoices
            .values()
            .filter(|inv| inv.contract_id == contract_id)
            .collect()
    }

    fn check_unit_unique(
        &self,
        number: &str,
        facility_id: FacilityId,
        except: Option<UnitId>,
    ) -> Result<(), StoreError> {
        let clash = self.units.values().any(|u| {
            u.number == number && u.facility_id == facility_id && Some(u.id) != except
        });
        if clash {
            return Err(StoreError::UniqueViolation {
                constraint: "unit_number_facility_key".into(),
                key: format!("({number}, {facility_id})"),
            });
        }
        Ok(())
    }

    fn check_invoice_unique(
        &self,
        invoice: &NewRentalInvoice,
        except: Option<RentalInvoiceId>,
    ) -> Result<(), StoreError> {
        let clash = self.invoices.values().any(|inv| {
            inv.contract_id == invoice.contract_id
                && inv.due_date == invoice.due_date
                && Some(inv.id) != except
        });
        if clash {
            return Err(StoreError::UniqueViolation {
                constraint: "rental_invoice_contract_due_date_key".into(),
                key: format!("({}, {})", invoice.contract_id, invoice.due_date),
            });
        }
        Ok(())
    }
}

/// Single-writer in-memory store. A session holds the table lock for its whole
/// lifetime and restores the begin-time snapshot unless it commits.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state. Waits for any open session to finish.
    pub async fn snapshot(&self) -> Tables {
        self.tables.lock().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn ImportSession>, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let before = guard.clone();
        Ok(Box::new(MemorySession {
            tables: guard,
            before: Some(before),
        }))
    }
}

struct MemorySession {
    tables: OwnedMutexGuard<Tables>,
    before: Option<Tables>,
}

impl MemorySession {
    fn restore(&mut self) {
        if let Some(before) = self.before.take() {
            *self.tables = before;
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.before.is_some() {
            debug!("memory session dropped without commit; discarding writes");
            self.restore();
        }
    }
}

#[async_trait]
impl ImportSession for MemorySession {
    async fn find_facility_by_name(&mut self, name: &str) -> Result<Option<Facility>, StoreError> {
        Ok(self
            .tables
            .facilities
            .values()
            .find(|f| f.name == name)
            .cloned())
    }

    async fn insert_facility(&mut self, new: NewFacility) -> Result<Facility, StoreError> {
        if self.tables.facilities.values().any(|f| f.name == new.name) {
            return Err(StoreError::UniqueViolation {
                constraint: "facility_name_key".into(),
                key: new.name,
            });
        }
        let facility = Facility {
            id: FacilityId(self.tables.next_id()),
            name: new.name,
        };
        self.tables.facilities.insert(facility.id, facility.clone());
        Ok(facility)
    }

    async fn find_unit(&mut self, key: &UnitKey) -> Result<Option<Unit>, StoreError> {
        Ok(self
            .tables
            .units
            .values()
            .find(|u| u.number == key.number && u.facility_id == key.facility_id)
            .cloned())
    }

    async fn find_unit_by_facility_name(
        &mut self,
        key: &RentRollUnitKey,
    ) -> Result<Option<(Unit, Facility)>, StoreError> {
        let tables = &*self.tables;
        Ok(tables
            .units
            .values()
            .filter(|u| u.number == key.number)
            .find_map(|u| {
                tables
                    .facilities
                    .get(&u.facility_id)
                    .filter(|f| normalize_facility_name(&f.name) == key.facility_name)
                    .map(|f| (u.clone(), f.clone()))
            }))
    }

    async fn insert_unit(&mut self, new: NewUnit) -> Result<Unit, StoreError> {
        if !self.tables.facilities.contains_key(&new.facility_id) {
            return Err(StoreError::NotFound {
                entity: "facility",
                id: new.facility_id.0,
            });
        }
        self.tables.check_unit_unique(&new.number, new.facility_id, None)?;
        let unit = Unit {
            id: UnitId(self.tables.next_id()),
            facility_id: new.facility_id,
            number: new.number,
            width: new.width,
            length: new.length,
            height: new.height,
            unit_type: new.unit_type,
            monthly_rent: new.monthly_rent,
        };
        self.tables.units.insert(unit.id, unit.clone());
        Ok(unit)
    }

    async fn update_unit(&mut self, unit: &Unit) -> Result<(), StoreError> {
        if !self.tables.units.contains_key(&unit.id) {
            return Err(StoreError::NotFound {
                entity: "unit",
                id: unit.id.0,
            });
        }
        self.tables
            .check_unit_unique(&unit.number, unit.facility_id, Some(unit.id))?;
        self.tables.units.insert(unit.id, unit.clone());
        Ok(())
    }

    async fn find_tenant(&mut self, key: &TenantKey) -> Result<Option<Tenant>, StoreError> {
        Ok(self
            .tables
            .tenants
            .values()
            .find(|t| key.matches(t))
            .cloned())
    }

    async fn insert_tenant(&mut self, new: NewTenant) -> Result<Tenant, StoreError> {
        let tenant = Tenant {
            id: TenantId(self.tables.next_id()),
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            phone: new.phone,
        };
        self.tables.tenants.insert(tenant.id, tenant.clone());
        Ok(tenant)
    }

    async fn update_tenant(&mut self, tenant: &Tenant) -> Result<(), StoreError> {
        match self.tables.tenants.get_mut(&tenant.id) {
            Some(slot) => {
                *slot = tenant.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "tenant",
                id: tenant.id.0,
            }),
        }
    }

    async fn find_contract(
        &mut self,
        key: &ContractKey,
    ) -> Result<Option<RentalContract>, StoreError> {
        Ok(self
            .tables
            .contracts
            .values()
            .find(|c| key.matches(c))
            .cloned())
    }

    async fn insert_contract(
        &mut self,
        new: NewRentalContract,
    ) -> Result<RentalContract, StoreError> {
        if !self.tables.units.contains_key(&new.unit_id) {
            return Err(StoreError::NotFound {
                entity: "unit",
                id: new.unit_id.0,
            });
        }
        if !self.tables.tenants.contains_key(&new.tenant_id) {
            return Err(StoreError::NotFound {
                entity: "tenant",
                id: new.tenant_id.0,
            });
        }
        let contract = RentalContract {
            id: RentalContractId(self.tables.next_id()),
            unit_id: new.unit_id,
            tenant_id: new.tenant_id,
            start_date: new.start_date,
            end_date: new.end_date,
            current_amount_owed: new.current_amount_owed,
        };
        self.tables.contracts.insert(contract.id, contract.clone());
        Ok(contract)
    }

    async fn update_contract(&mut self, contract: &RentalContract) -> Result<(), StoreError> {
        match self.tables.contracts.get_mut(&contract.id) {
            Some(slot) => {
                *slot = contract.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "rental contract",
                id: contract.id.0,
            }),
        }
    }

    async fn invoices_for_contract(
        &mut self,
        contract_id: RentalContractId,
    ) -> Result<Vec<RentalInvoice>, StoreError> {
        Ok(self
            .tables
            .invoices_of(contract_id)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn insert_invoice(&mut self, new: NewRentalInvoice) -> Result<RentalInvoice, StoreError> {
        if !self.tables.contracts.contains_key(&new.contract_id) {
            return Err(StoreError::NotFound {
                entity: "rental contract",
                id: new.contract_id.0,
            });
        }
        self.tables.check_invoice_unique(&new, None)?;
        let invoice = RentalInvoice {
            id: RentalInvoiceId(self.tables.next_id()),
            contract_id: new.contract_id,
            due_date: new.due_date,
            amount: new.amount,
            balance: new.balance,
        };
        self.tables.invoices.insert(invoice.id, invoice.clone());
        Ok(invoice)
    }

    async fn update_invoice(&mut self, invoice: &RentalInvoice) -> Result<(), StoreError> {
        if !self.tables.invoices.contains_key(&invoice.id) {
            return Err(StoreError::NotFound {
                entity: "rental invoice",
                id: invoice.id.0,
            });
        }
        let probe = NewRentalInvoice {
            contract_id: invoice.contract_id,
            due_date: invoice.due_date,
            amount: invoice.amount,
            balance: invoice.balance,
        };
        self.tables.check_invoice_unique(&probe, Some(invoice.id))?;
        self.tables.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut session = self;
        session.before = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut session = self;
        session.restore();
        Ok(())
    }
}
