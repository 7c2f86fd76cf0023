//! Domain model, natural keys and field normalization for the rent-roll importer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod normalize;

pub use normalize::{
    clean, normalize_facility_name, normalize_unit_number, parse_amount, parse_date,
    parse_unit_size, round_cents, to_iso, UnitSize,
};

pub const CRATE_NAME: &str = "rentroll-core";

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Surrogate key of a storage facility.
    FacilityId
);
entity_id!(UnitId);
entity_id!(TenantId);
entity_id!(RentalContractId);
entity_id!(RentalInvoiceId);

/// A storage facility. `name` is globally unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    pub id: FacilityId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFacility {
    pub name: String,
}

/// A rentable unit, unique per `(number, facility_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub facility_id: FacilityId,
    pub number: String,
    pub width: f64,
    pub length: f64,
    pub height: f64,
    pub unit_type: String,
    pub monthly_rent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUnit {
    pub facility_id: FacilityId,
    pub number: String,
    pub width: f64,
    pub length: f64,
    pub height: f64,
    pub unit_type: String,
    pub monthly_rent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTenant {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Links one unit to one tenant from `start_date`.
///
/// `current_amount_owed` is derived: after every rent-roll pass that touches the
/// contract it equals the sum of the balances of its invoices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentalContract {
    pub id: RentalContractId,
    pub unit_id: UnitId,
    pub tenant_id: TenantId,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub current_amount_owed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRentalContract {
    pub unit_id: UnitId,
    pub tenant_id: TenantId,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub current_amount_owed: f64,
}

/// An open invoice, unique per `(contract_id, due_date)`. Deleted with its contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentalInvoice {
    pub id: RentalInvoiceId,
    pub contract_id: RentalContractId,
    pub due_date: DateTime<Utc>,
    pub amount: f64,
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRentalInvoice {
    pub contract_id: RentalContractId,
    pub due_date: DateTime<Utc>,
    pub amount: f64,
    pub balance: f64,
}

/// Natural key of a unit. `number` must already be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitKey {
    pub number: String,
    pub facility_id: FacilityId,
}

impl UnitKey {
    pub fn new(raw_number: &str, facility_id: FacilityId) -> Self {
        Self {
            number: normalize_unit_number(raw_number),
            facility_id,
        }
    }
}

/// Rent-roll unit lookup: the facility is matched on its trimmed, lowercased name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RentRollUnitKey {
    pub number: String,
    pub facility_name: String,
}

impl RentRollUnitKey {
    pub fn new(raw_number: &str, raw_facility_name: &str) -> Self {
        Self {
            number: normalize_unit_number(raw_number),
            facility_name: normalize_facility_name(raw_facility_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TenantKey {
    Email(String),
    Name {
        first_name: String,
        last_name: String,
        phone: Option<String>,
    },
}

/// Lookup keys for a tenant in precedence order: email first when supplied, then
/// name narrowed by phone when a phone is supplied.
pub fn tenant_keys(
    first_name: &str,
    last_name: &str,
    email: Option<&str>,
    phone: Option<&str>,
) -> Vec<TenantKey> {
    let mut keys = Vec::with_capacity(2);
    if let Some(email) = email {
        keys.push(TenantKey::Email(email.to_string()));
    }
    keys.push(TenantKey::Name {
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        phone: phone.map(ToString::to_string),
    });
    keys
}

impl TenantKey {
    pub fn matches(&self, tenant: &Tenant) -> bool {
        match self {
            TenantKey::Email(email) => tenant.email.as_deref() == Some(email.as_str()),
            TenantKey::Name {
                first_name,
                last_name,
                phone,
            } => {
                tenant.first_name == *first_name
                    && tenant.last_name == *last_name
                    && phone
                        .as_deref()
                        .map_or(true, |p| tenant.phone.as_deref() == Some(p))
            }
        }
    }
}

/// Start-date equality is exact; a corrected start date yields a second contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContractKey {
    pub unit_id: UnitId,
    pub tenant_id: TenantId,
    pub start_date: DateTime<Utc>,
}

impl ContractKey {
    pub fn matches(&self, contract: &RentalContract) -> bool {
        contract.unit_id == self.unit_id
            && contract.tenant_id == self.tenant_id
            && contract.start_date == self.start_date
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvoiceKey {
    pub contract_id: RentalContractId,
    pub due_date: DateTime<Utc>,
}

impl InvoiceKey {
    pub fn matches(&self, invoice: &RentalInvoice) -> bool {
        invoice.contract_id == self.contract_id && invoice.due_date == self.due_date
    }
}
