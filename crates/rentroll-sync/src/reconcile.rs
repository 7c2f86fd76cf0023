//! Natural-key upserts per entity and the per-row reconciliation steps built on them.

use std::collections::HashMap;

use async_trait::async_trait;
use rentroll_core::{
    clean, normalize_facility_name, normalize_unit_number, parse_amount, parse_date,
    parse_unit_size, round_cents, tenant_keys, ContractKey, Facility, InvoiceKey, NewFacility,
    NewRentalContract, NewRentalInvoice, NewTenant, NewUnit, RentRollUnitKey, RentalContract,
    RentalInvoice, Tenant, Unit, UnitKey,
};
use rentroll_ingest::{RentRollRow, UnitCsvRow};
use rentroll_storage::{ImportSession, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{RentRollImportReport, UnitImportReport};

/// Outcome of a find-or-create-or-update.
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert<T> {
    Created(T),
    Updated(T),
    Unchanged(T),
}

impl<T> Upsert<T> {
    pub fn record(&self) -> &T {
        match self {
            Upsert::Created(r) | Upsert::Updated(r) | Upsert::Unchanged(r) => r,
        }
    }

    pub fn into_record(self) -> T {
        match self {
            Upsert::Created(r) | Upsert::Updated(r) | Upsert::Unchanged(r) => r,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Upsert::Created(_))
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, Upsert::Updated(_))
    }
}

/// An entity that can be matched on its natural key and merged field by field.
///
/// The store's uniqueness constraints back this up; they are not the matching
/// mechanism.
#[async_trait]
pub trait Upsertable: Sized + Send {
    type Draft: Send + Sync;

    async fn find(
        session: &mut dyn ImportSession,
        draft: &Self::Draft,
    ) -> Result<Option<Self>, StoreError>;

    async fn insert(
        session: &mut dyn ImportSession,
        draft: &Self::Draft,
    ) -> Result<Self, StoreError>;

    async fn update(session: &mut dyn ImportSession, record: &Self) -> Result<(), StoreError>;

    /// Applies the draft's differing fields to `self`. Returns whether anything changed.
    fn merge(&mut self, draft: &Self::Draft) -> bool;
}

/// Find by natural key; update only on difference; otherwise create.
pub async fn upsert<E: Upsertable>(
    session: &mut dyn ImportSession,
    draft: &E::Draft,
) -> Result<Upsert<E>, StoreError> {
    match E::find(session, draft).await? {
        Some(mut existing) => {
            if existing.merge(draft) {
                E::update(session, &existing).await?;
                Ok(Upsert::Updated(existing))
            } else {
                Ok(Upsert::Unchanged(existing))
            }
        }
        None => Ok(Upsert::Created(E::insert(session, draft).await?)),
    }
}

#[async_trait]
impl Upsertable for Facility {
    type Draft = NewFacility;

    async fn find(
        session: &mut dyn ImportSession,
        draft: &NewFacility,
    ) -> Result<Option<Self>, StoreError> {
        session.find_facility_by_name(&draft.name).await
    }

    async fn insert(
        session: &mut dyn ImportSession,
        draft: &NewFacility,
    ) -> Result<Self, StoreError> {
        session.insert_facility(draft.clone()).await
    }

    // Facilities carry nothing besides their key.
    async fn update(_session: &mut dyn ImportSession, _record: &Self) -> Result<(), StoreError> {
        Ok(())
    }

    fn merge(&mut self, _draft: &NewFacility) -> bool {
        false
    }
}

#[async_trait]
impl Upsertable for Unit {
    type Draft = NewUnit;

    async fn find(
        session: &mut dyn ImportSession,
        draft: &NewUnit,
    ) -> Result<Option<Self>, StoreError> {
        let key = UnitKey::new(&draft.number, draft.facility_id);
        session.find_unit(&key).await
    }

    async fn insert(session: &mut dyn ImportSession, draft: &NewUnit) -> Result<Self, StoreError> {
        session.insert_unit(draft.clone()).await
    }

    async fn update(session: &mut dyn ImportSession, record: &Self) -> Result<(), StoreError> {
        session.update_unit(record).await
    }

    fn merge(&mut self, draft: &NewUnit) -> bool {
        let mut changed = false;
        if self.width != draft.width {
            self.width = draft.width;
            changed = true;
        }
        if self.length != draft.length {
            self.length = draft.length;
            changed = true;
        }
        if self.height != draft.height {
            self.height = draft.height;
            changed = true;
        }
        if self.unit_type != draft.unit_type {
            self.unit_type = draft.unit_type.clone();
            changed = true;
        }
        changed
    }
}

#[async_trait]
impl Upsertable for Tenant {
    type Draft = NewTenant;

    async fn find(
        session: &mut dyn ImportSession,
        draft: &NewTenant,
    ) -> Result<Option<Self>, StoreError> {
        let keys = tenant_keys(
            &draft.first_name,
            &draft.last_name,
            draft.email.as_deref(),
            draft.phone.as_deref(),
        );
        for key in &keys {
            if let Some(tenant) = session.find_tenant(key).await? {
                return Ok(Some(tenant));
            }
        }
        Ok(None)
    }

    async fn insert(
        session: &mut dyn ImportSession,
        draft: &NewTenant,
    ) -> Result<Self, StoreError> {
        session.insert_tenant(draft.clone()).await
    }

    async fn update(session: &mut dyn ImportSession, record: &Self) -> Result<(), StoreError> {
        session.update_tenant(record).await
    }

    /// Names follow the source; contact details are only ever filled in or replaced,
    /// never erased by an empty incoming value.
    fn merge(&mut self, draft: &NewTenant) -> bool {
        let mut changed = false;
        if self.first_name != draft.first_name {
            self.first_name = draft.first_name.clone();
            changed = true;
        }
        if self.last_name != draft.last_name {
            self.last_name = draft.last_name.clone();
            changed = true;
        }
        if draft.email.is_some() && self.email != draft.email {
            self.email = draft.email.clone();
            changed = true;
        }
        if draft.phone.is_some() && self.phone != draft.phone {
            self.phone = draft.phone.clone();
            changed = true;
        }
        changed
    }
}

#[async_trait]
impl Upsertable for RentalContract {
    type Draft = NewRentalContract;

    async fn find(
        session: &mut dyn ImportSession,
        draft: &NewRentalContract,
    ) -> Result<Option<Self>, StoreError> {
        let key = ContractKey {
            unit_id: draft.unit_id,
            tenant_id: draft.tenant_id,
            start_date: draft.start_date,
        };
        session.find_contract(&key).await
    }

    async fn insert(
        session: &mut dyn ImportSession,
        draft: &NewRentalContract,
    ) -> Result<Self, StoreError> {
        session.insert_contract(draft.clone()).await
    }

    async fn update(session: &mut dyn ImportSession, record: &Self) -> Result<(), StoreError> {
        session.update_contract(record).await
    }

    fn merge(&mut self, draft: &NewRentalContract) -> bool {
        let mut changed = false;
        if draft.end_date.is_some() && self.end_date != draft.end_date {
            self.end_date = draft.end_date;
            changed = true;
        }
        if self.current_amount_owed != draft.current_amount_owed {
            self.current_amount_owed = draft.current_amount_owed;
            changed = true;
        }
        changed
    }
}

#[async_trait]
impl Upsertable for RentalInvoice {
    type Draft = NewRentalInvoice;

    /// Searches the contract's known invoices for an exact due-date match.
    async fn find(
        session: &mut dyn ImportSession,
        draft: &NewRentalInvoice,
    ) -> Result<Option<Self>, StoreError> {
        let key = InvoiceKey {
            contract_id: draft.contract_id,
            due_date: draft.due_date,
        };
        let invoices = session.invoices_for_contract(draft.contract_id).await?;
        Ok(invoices.into_iter().find(|inv| key.matches(inv)))
    }

    async fn insert(
        session: &mut dyn ImportSession,
        draft: &NewRentalInvoice,
    ) -> Result<Self, StoreError> {
        session.insert_invoice(draft.clone()).await
    }

    async fn update(session: &mut dyn ImportSession, record: &Self) -> Result<(), StoreError> {
        session.update_invoice(record).await
    }

    fn merge(&mut self, draft: &NewRentalInvoice) -> bool {
        let mut changed = false;
        if self.amount != draft.amount {
            self.amount = draft.amount;
            changed = true;
        }
        if self.balance != draft.balance {
            self.balance = draft.balance;
            changed = true;
        }
        changed
    }
}

/// Facilities resolved during one unit-file pass, keyed by exact trimmed name.
/// Built fresh for every pass and dropped with it.
#[derive(Debug, Default)]
pub struct FacilityCache {
    by_name: HashMap<String, Facility>,
}

impl FacilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub async fn resolve(
        &mut self,
        session: &mut dyn ImportSession,
        name: &str,
    ) -> Result<Upsert<Facility>, StoreError> {
        if let Some(facility) = self.by_name.get(name) {
            return Ok(Upsert::Unchanged(facility.clone()));
        }
        let draft = NewFacility {
            name: name.to_string(),
        };
        let outcome = upsert::<Facility>(session, &draft).await?;
        self.by_name
            .insert(name.to_string(), outcome.record().clone());
        Ok(outcome)
    }
}

/// Why a row was left out. Row skips are logged and never abort the file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowSkip {
    #[error("skipped (missing required field: {})", .0.join(", "))]
    MissingRequired(Vec<&'static str>),
    #[error("skipped (invalid size format {0:?})")]
    InvalidSize(String),
    #[error("skipped (invalid rentStartDate {0:?})")]
    InvalidStartDate(String),
    #[error("skipped (unreadable record: {0})")]
    Unreadable(String),
    #[error("orphaned unit (no unit {unit_number:?} at facility {facility_name:?})")]
    UnitNotFound {
        unit_number: String,
        facility_name: String,
    },
}

#[derive(Debug, Error)]
pub enum RowError {
    #[error(transparent)]
    Skip(#[from] RowSkip),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn missing_fields(fields: &[(&'static str, &str)]) -> Vec<&'static str> {
    fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect()
}

/// Upserts the facility and unit described by one inventory row.
pub async fn reconcile_unit_row(
    session: &mut dyn ImportSession,
    cache: &mut FacilityCache,
    row: &UnitCsvRow,
    report: &mut UnitImportReport,
) -> Result<(), RowError> {
    let missing = missing_fields(&[
        ("facilityName", &row.facility_name),
        ("unitNumber", &row.unit_number),
        ("unitSize", &row.unit_size),
    ]);
    if !missing.is_empty() {
        return Err(RowSkip::MissingRequired(missing).into());
    }

    let size =
        parse_unit_size(&row.unit_size).ok_or_else(|| RowSkip::InvalidSize(row.unit_size.clone()))?;
    let facility_name = row.facility_name.trim();

    let facility = cache.resolve(session, facility_name).await?;
    if facility.is_created() {
        report.facilities_created += 1;
        info!(facility = facility_name, id = %facility.record().id, "created facility");
    }

    let draft = NewUnit {
        facility_id: facility.record().id,
        number: normalize_unit_number(&row.unit_number),
        width: size.width,
        length: size.length,
        height: size.height,
        unit_type: clean(&row.unit_type).unwrap_or_default(),
        monthly_rent: None,
    };

    match upsert::<Unit>(session, &draft).await? {
        Upsert::Created(unit) => {
            report.units_created += 1;
            debug!(unit = %unit.number, facility = facility_name, "created unit");
        }
        Upsert::Updated(unit) => {
            report.units_updated += 1;
            debug!(unit = %unit.number, facility = facility_name, "updated unit");
        }
        Upsert::Unchanged(_) => report.units_unchanged += 1,
    }
    Ok(())
}

/// Reconciles one rent-roll row: unit rent, tenant, contract, open invoice and the
/// contract balance, in that order.
///
/// All validation happens before the first write so a skipped row leaves no trace.
pub async fn reconcile_rent_roll_row(
    session: &mut dyn ImportSession,
    row: &RentRollRow,
    report: &mut RentRollImportReport,
) -> Result<(), RowError> {
    let missing = missing_fields(&[
        ("unitNumber", &row.unit_number),
        ("firstName", &row.first_name),
        ("lastName", &row.last_name),
    ]);
    if !missing.is_empty() {
        return Err(RowSkip::MissingRequired(missing).into());
    }

    let start_date = parse_date(&row.rent_start_date)
        .ok_or_else(|| RowSkip::InvalidStartDate(row.rent_start_date.clone()))?;

    let key = RentRollUnitKey::new(&row.unit_number, &row.facility_name);
    let Some((mut unit, facility)) = session.find_unit_by_facility_name(&key).await? else {
        return Err(RowSkip::UnitNotFound {
            unit_number: row.unit_number.clone(),
            facility_name: row.facility_name.clone(),
        }
        .into());
    };

    // The lookup already filters on the name; this catches stores that lowercase
    // differently.
    if !key.facility_name.is_empty()
        && normalize_facility_name(&facility.name) != key.facility_name
    {
        report.facility_mismatches += 1;
        warn!(
            unit = %row.unit_number,
            rent_roll_facility = %row.facility_name,
            unit_facility = %facility.name,
            "facility name mismatch; using the unit's facility"
        );
    }

    let monthly_rent = round_cents(parse_amount(&row.monthly_rent));
    if monthly_rent > 0.0 && unit.monthly_rent != Some(monthly_rent) {
        info!(
            unit = %unit.number,
            from = ?unit.monthly_rent,
            to = monthly_rent,
            "updating unit base monthly rent"
        );
        unit.monthly_rent = Some(monthly_rent);
        session.update_unit(&unit).await?;
        report.unit_rents_updated += 1;
    }

    let tenant_draft = NewTenant {
        first_name: row.first_name.trim().to_string(),
        last_name: row.last_name.trim().to_string(),
        email: clean(&row.email),
        phone: clean(&row.phone),
    };
    let tenant = upsert::<Tenant>(session, &tenant_draft).await?;
    if tenant.is_created() {
        report.tenants_created += 1;
    } else if tenant.is_updated() {
        report.tenants_updated += 1;
    }
    let tenant = tenant.into_record();

    let current_rent_owed = round_cents(parse_amount(&row.current_rent_owed));
    let contract_draft = NewRentalContract {
        unit_id: unit.id,
        tenant_id: tenant.id,
        start_date,
        end_date: parse_date(&row.rent_end_date),
        current_amount_owed: current_rent_owed,
    };
    // An existing contract is merged in memory only; `recompute_balance` persists it.
    let (mut contract, found) = match RentalContract::find(session, &contract_draft).await? {
        Some(existing) => {
            let mut contract = existing.clone();
            contract.merge(&contract_draft);
            (contract, Some(existing))
        }
        None => (RentalContract::insert(session, &contract_draft).await?, None),
    };

    let due_date = parse_date(&row.current_rent_owed_due_date);
    if let Some(due_date) = due_date.filter(|_| current_rent_owed > 0.0) {
        let invoice_draft = NewRentalInvoice {
            contract_id: contract.id,
            due_date,
            amount: monthly_rent,
            balance: current_rent_owed,
        };
        let invoice = upsert::<RentalInvoice>(session, &invoice_draft).await?;
        if invoice.is_created() {
            report.invoices_created += 1;
        } else if invoice.is_updated() {
            report.invoices_updated += 1;
        }
    }

    recompute_balance(session, &mut contract).await?;

    // Counted on the net change, once the balance has been re-derived.
    match found {
        None => report.contracts_created += 1,
        Some(found) if found != contract => report.contracts_updated += 1,
        Some(_) => {}
    }
    Ok(())
}

/// Sets the contract's owed amount to the sum of its invoice balances and persists it.
/// A non-finite stored balance counts as zero.
pub async fn recompute_balance(
    session: &mut dyn ImportSession,
    contract: &mut RentalContract,
) -> Result<f64, StoreError> {
    let invoices = session.invoices_for_contract(contract.id).await?;
    let total: f64 = invoices
        .iter()
        .map(|inv| if inv.balance.is_finite() { inv.balance } else { 0.0 })
        .sum();
    contract.current_amount_owed = round_cents(total);
    session.update_contract(contract).await?;
    Ok(contract.current_amount_owed)
}
