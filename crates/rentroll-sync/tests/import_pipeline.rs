use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rentroll_core::{
    ContractKey, Facility, NewFacility, NewRentalContract, NewRentalInvoice, NewTenant, NewUnit,
    RentRollUnitKey, RentalContract, RentalContractId, RentalInvoice, Tenant, TenantKey, Unit,
    UnitKey,
};
use rentroll_ingest::IngestError;
use rentroll_storage::{ImportSession, MemoryStore, Store, StoreError, Tables};
use rentroll_sync::{ImportConfig, ImportError, ImportPipeline};
use tempfile::{tempdir, TempDir};

const UNIT_HEADER: &str = "facilityName,unitNumber,unitSize,unitType";
const RENT_ROLL_HEADER: &str = "facilityName,unitNumber,firstName,lastName,phone,email,rentStartDate,rentEndDate,monthlyRent,currentRentOwed,currentRentOwedDueDate";

struct Fixture {
    _dir: TempDir,
    config: ImportConfig,
    store: MemoryStore,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().expect("tempdir");
        let config = ImportConfig {
            database_url: String::new(),
            data_dir: dir.path().to_path_buf(),
            data_folder_name: "client".into(),
            unit_file_name: "unit.csv".into(),
            rent_roll_file_name: "rentRoll.csv".into(),
            error_log: dir.path().join("logs").join("migration-errors.log"),
        };
        fs::create_dir_all(config.data_folder()).expect("data folder");
        Self {
            _dir: dir,
            config,
            store: MemoryStore::new(),
        }
    }

    fn pipeline(&self) -> ImportPipeline {
        ImportPipeline::new(self.config.clone(), Arc::new(self.store.clone()))
    }

    fn write_units(&self, rows: &[&str]) {
        write_csv(self.config.unit_file_path(), UNIT_HEADER, rows);
    }

    fn write_rent_roll(&self, rows: &[&str]) {
        write_csv(self.config.rent_roll_file_path(), RENT_ROLL_HEADER, rows);
    }

    fn error_log(&self) -> String {
        fs::read_to_string(&self.config.error_log).unwrap_or_default()
    }

    async fn tables(&self) -> Tables {
        self.store.snapshot().await
    }
}

fn write_csv(path: PathBuf, header: &str, rows: &[&str]) {
    let mut body = String::from(header);
    for row in rows {
        body.push('\n');
        body.push_str(row);
    }
    body.push('\n');
    fs::write(path, body).expect("write csv");
}

fn only_contract(tables: &Tables) -> &RentalContract {
    assert_eq!(tables.contracts.len(), 1, "expected exactly one contract");
    tables.contracts.values().next().expect("contract")
}

#[tokio::test]
async fn end_to_end_single_tenancy() {
    let fx = Fixture::new();
    fx.write_units(&["North Storage,A1,10x10x8,standard"]);
    fx.write_rent_roll(&["North Storage,A1,Jane,Doe,,,2024-01-01,,,150.00,2024-02-01"]);

    let summary = fx.pipeline().run_full_import().await.expect("import");
    assert_eq!(summary.units.facilities_created, 1);
    assert_eq!(summary.units.units_created, 1);
    assert_eq!(summary.rent_roll.tenants_created, 1);
    assert_eq!(summary.rent_roll.contracts_created, 1);
    assert_eq!(summary.rent_roll.invoices_created, 1);
    assert_eq!(summary.units.run_id, summary.run_id);
    assert_eq!(summary.rent_roll.source_sha256.len(), 64);

    let tables = fx.tables().await;
    assert_eq!(tables.facilities.len(), 1);
    assert_eq!(tables.units.len(), 1);
    assert_eq!(tables.tenants.len(), 1);
    assert_eq!(tables.invoices.len(), 1);

    let unit = tables.units.values().next().expect("unit");
    assert_eq!((unit.width, unit.length, unit.height), (10.0, 10.0, 8.0));
    assert_eq!(unit.unit_type, "standard");

    let contract = only_contract(&tables);
    assert_eq!(contract.current_amount_owed, 150.0);
    let invoice = tables.invoices.values().next().expect("invoice");
    assert_eq!(invoice.balance, 150.0);
    assert_eq!(invoice.contract_id, contract.id);
}

#[tokio::test]
async fn unit_import_is_idempotent() {
    let fx = Fixture::new();
    fx.write_units(&[
        "North Storage,A1,10x10x8,standard",
        "North Storage,A2,5x10x8,standard",
        "South Storage,B1,10x20x10,drive-up",
    ]);
    let pipeline = fx.pipeline();

    let first = pipeline.import_units().await.expect("first run");
    assert_eq!(first.facilities_created, 2);
    assert_eq!(first.units_created, 3);
    let before = fx.tables().await;

    let second = pipeline.import_units().await.expect("second run");
    assert_eq!(second.facilities_created, 0);
    assert_eq!(second.units_created, 0);
    assert_eq!(second.units_updated, 0);
    assert_eq!(second.units_unchanged, 3);

    let after = fx.tables().await;
    assert_eq!(before.facilities, after.facilities);
    assert_eq!(before.units, after.units);
}

#[tokio::test]
async fn changed_unit_fields_are_updated_in_place() {
    let fx = Fixture::new();
    fx.write_units(&["North Storage,A1,10x10x8,standard"]);
    let pipeline = fx.pipeline();
    pipeline.import_units().await.expect("first run");

    fx.write_units(&["North Storage,A1,10x10x10,climate"]);
    let report = pipeline.import_units().await.expect("second run");
    assert_eq!(report.units_updated, 1);

    let tables = fx.tables().await;
    assert_eq!(tables.units.len(), 1);
    let unit = tables.units.values().next().expect("unit");
    assert_eq!(unit.height, 10.0);
    assert_eq!(unit.unit_type, "climate");
}

#[tokio::test]
async fn rent_roll_import_is_idempotent() {
    let fx = Fixture::new();
    fx.write_units(&[
        "North Storage,A1,10x10x8,standard",
        "North Storage,A2,5x5x8,locker",
        "North Storage,A3,5x5x8,locker",
    ]);
    fx.write_rent_roll(&[
        "North Storage,A1,Jane,Doe,555-0100,jane@example.com,2024-01-01,,120.00,150.00,2024-02-01",
        "North Storage,A2,John,Roe,,,01/15/2024,12/31/2024,45,0,",
        // Owed but undated: no invoice, so the balance settles back to zero.
        "North Storage,A3,Ana,Poe,,,2024-03-01,,60,80,",
    ]);
    let pipeline = fx.pipeline();

    let first = pipeline.run_full_import().await.expect("first run");
    assert_eq!(first.rent_roll.contracts_created, 3);
    assert_eq!(first.rent_roll.contracts_updated, 0);
    let before = fx.tables().await;

    let summary = pipeline.run_full_import().await.expect("second run");
    let report = summary.rent_roll;
    assert_eq!(report.tenants_created, 0);
    assert_eq!(report.tenants_updated, 0);
    assert_eq!(report.contracts_created, 0);
    assert_eq!(report.contracts_updated, 0);
    assert_eq!(report.invoices_created, 0);
    assert_eq!(report.invoices_updated, 0);
    assert_eq!(report.unit_rents_updated, 0);
    assert!(before
        .contracts
        .values()
        .all(|c| c.current_amount_owed == 0.0 || c.current_amount_owed == 150.0));

    let after = fx.tables().await;
    assert_eq!(before.tenants, after.tenants);
    assert_eq!(before.contracts, after.contracts);
    assert_eq!(before.invoices, after.invoices);
    assert_eq!(before.units, after.units);
}

#[tokio::test]
async fn spreadsheet_unit_numbers_resolve_to_one_unit() {
    let fx = Fixture::new();
    fx.write_units(&[
        "North Storage,1000.0,10x10x8,standard",
        "North Storage,1000,10x10x8,standard",
    ]);
    fx.write_rent_roll(&["North Storage,1000,Jane,Doe,,,2024-01-01,,,0,"]);

    let summary = fx.pipeline().run_full_import().await.expect("import");
    assert_eq!(summary.units.units_created, 1);
    assert_eq!(summary.units.units_unchanged, 1);
    assert_eq!(summary.rent_roll.contracts_created, 1);

    let tables = fx.tables().await;
    assert_eq!(tables.units.len(), 1);
    assert_eq!(tables.units.values().next().expect("unit").number, "1000");
}

#[tokio::test]
async fn zero_owed_never_creates_an_invoice() {
    let fx = Fixture::new();
    fx.write_units(&["North Storage,A1,10x10x8,standard", "North Storage,A2,10x10x8,standard"]);
    fx.write_rent_roll(&[
        "North Storage,A1,Jane,Doe,,,2024-01-01,,100,0,2024-02-01",
        // Owed but undated.
        "North Storage,A2,John,Roe,,,2024-01-01,,100,80,",
    ]);

    let summary = fx.pipeline().run_full_import().await.expect("import");
    assert_eq!(summary.rent_roll.contracts_created, 2);
    assert_eq!(summary.rent_roll.invoices_created, 0);

    let tables = fx.tables().await;
    assert!(tables.invoices.is_empty());
    // No invoices means the aggregate is zero, whatever the row said.
    assert!(tables.contracts.values().all(|c| c.current_amount_owed == 0.0));
}

#[tokio::test]
async fn orphaned_rent_roll_row_is_skipped_and_logged() {
    let fx = Fixture::new();
    fx.write_units(&["North Storage,A1,10x10x8,standard"]);
    fx.write_rent_roll(&[
        "North Storage,Z9,Ghost,Tenant,,,2024-01-01,,,10,2024-02-01",
        "South Storage,A1,Wrong,Facility,,,2024-01-01,,,10,2024-02-01",
        "North Storage,A1,Jane,Doe,,,2024-01-01,,,150.00,2024-02-01",
    ]);

    let summary = fx.pipeline().run_full_import().await.expect("import");
    assert_eq!(summary.rent_roll.rows, 3);
    assert_eq!(summary.rent_roll.skipped, 2);
    assert_eq!(summary.rent_roll.contracts_created, 1);

    let tables = fx.tables().await;
    assert_eq!(tables.tenants.len(), 1);
    assert_eq!(
        tables.tenants.values().next().expect("tenant").first_name,
        "Jane"
    );

    let log = fx.error_log();
    assert_eq!(log.matches("rentRoll.csv orphaned unit").count(), 2);
    assert!(log.contains("\"unitNumber\":\"Z9\""));
}

#[tokio::test]
async fn malformed_unit_rows_are_skipped() {
    let fx = Fixture::new();
    fx.write_units(&[
        "North Storage,A1,10x12,standard",
        ",A2,10x10x8,standard",
        "North Storage,A3,10x10x8,standard",
    ]);

    let report = fx.pipeline().import_units().await.expect("import");
    assert_eq!(report.rows, 3);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.units_created, 1);

    let log = fx.error_log();
    assert!(log.contains("unit.csv skipped (invalid size format \"10x12\")"));
    assert!(log.contains("unit.csv skipped (missing required field: facilityName)"));
}

#[tokio::test]
async fn unit_row_without_unit_type_still_imports() {
    let fx = Fixture::new();
    fx.write_units(&["N,A1,1x1x1,s", "N,A2,1x1x1", "N,A3,1x1x1,s"]);

    let report = fx.pipeline().import_units().await.expect("import");
    assert_eq!(report.rows, 3);
    assert_eq!(report.units_created, 3);
    assert_eq!(report.skipped, 0);

    let tables = fx.tables().await;
    let mut types: Vec<(String, String)> = tables
        .units
        .values()
        .map(|u| (u.number.clone(), u.unit_type.clone()))
        .collect();
    types.sort();
    assert_eq!(
        types,
        vec![
            ("A1".to_string(), "s".to_string()),
            ("A2".to_string(), String::new()),
            ("A3".to_string(), "s".to_string()),
        ]
    );
}

#[tokio::test]
async fn undecodable_record_is_skipped_and_logged() {
    let fx = Fixture::new();
    let mut bytes = format!("{UNIT_HEADER}\nN,A1,1x1x1,s\nN,").into_bytes();
    bytes.extend_from_slice(&[0xff, 0xfe]);
    bytes.extend_from_slice(b",1x1x1,s\nN,A3,1x1x1,s\n");
    fs::write(fx.config.unit_file_path(), bytes).expect("write csv");

    let report = fx.pipeline().import_units().await.expect("import");
    assert_eq!(report.rows, 3);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.units_created, 2);
    assert!(fx.error_log().contains("unit.csv skipped (unreadable record:"));
}

#[tokio::test]
async fn bad_start_date_skips_the_row_without_writes() {
    let fx = Fixture::new();
    fx.write_units(&["North Storage,A1,10x10x8,standard"]);
    fx.write_rent_roll(&[
        "North Storage,A1,Jane,Doe,,,someday,,95,150.00,2024-02-01",
        "North Storage,A1,,Doe,,,2024-01-01,,,0,",
    ]);

    let summary = fx.pipeline().run_full_import().await.expect("import");
    assert_eq!(summary.rent_roll.skipped, 2);

    let tables = fx.tables().await;
    assert!(tables.tenants.is_empty());
    assert!(tables.contracts.is_empty());
    assert_eq!(
        tables.units.values().next().expect("unit").monthly_rent,
        None
    );
    let log = fx.error_log();
    assert!(log.contains("skipped (invalid rentStartDate \"someday\")"));
    assert!(log.contains("skipped (missing required field: firstName)"));
}

#[tokio::test]
async fn missing_source_file_fails_before_any_write() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();

    let err = pipeline.import_units().await.unwrap_err();
    assert!(matches!(
        err,
        ImportError::Ingest {
            file: "unit.csv",
            source: IngestError::MissingFile { .. }
        }
    ));

    fx.write_units(&["North Storage,A1,10x10x8,standard"]);
    let err = pipeline.run_full_import().await.unwrap_err();
    assert!(err.to_string().contains("rent-roll import failed"));

    // The unit file committed on its own before the rent roll was found missing.
    let tables = fx.tables().await;
    assert_eq!(tables.units.len(), 1);
    assert!(tables.tenants.is_empty());
    assert!(fx.error_log().contains("rentRoll.csv import failed"));
}

#[tokio::test]
async fn facility_matching_is_exact_for_units_but_not_for_rent_roll() {
    let fx = Fixture::new();
    fx.write_units(&["North Storage,A1,10x10x8,standard", "north storage,B2,5x5x8,locker"]);
    fx.write_rent_roll(&["  NORTH STORAGE ,A1,Jane,Doe,,,2024-01-01,,,0,"]);

    let summary = fx.pipeline().run_full_import().await.expect("import");
    assert_eq!(summary.units.facilities_created, 2);
    assert_eq!(summary.rent_roll.contracts_created, 1);
    assert_eq!(summary.rent_roll.facility_mismatches, 0);

    let tables = fx.tables().await;
    let contract = only_contract(&tables);
    let unit = &tables.units[&contract.unit_id];
    assert_eq!(tables.facilities[&unit.facility_id].name, "North Storage");
}

#[tokio::test]
async fn corrected_start_date_opens_a_second_contract() {
    let fx = Fixture::new();
    fx.write_units(&["North Storage,A1,10x10x8,standard"]);
    fx.write_rent_roll(&["North Storage,A1,Jane,Doe,,jane@example.com,2024-01-01,,,0,"]);
    let pipeline = fx.pipeline();
    pipeline.run_full_import().await.expect("first run");

    fx.write_rent_roll(&["North Storage,A1,Jane,Doe,,jane@example.com,2024-01-02,,,0,"]);
    let report = pipeline.import_rent_roll().await.expect("second run");
    assert_eq!(report.tenants_created, 0);
    assert_eq!(report.contracts_created, 1);

    let tables = fx.tables().await;
    assert_eq!(tables.tenants.len(), 1);
    assert_eq!(tables.contracts.len(), 2);
}

#[tokio::test]
async fn contract_balance_tracks_all_invoices() {
    let fx = Fixture::new();
    fx.write_units(&["North Storage,A1,10x10x8,standard"]);
    fx.write_rent_roll(&[
        "North Storage,A1,Jane,Doe,,,2024-01-01,,100,150.00,2024-02-01",
        "North Storage,A1,Jane,Doe,,,2024-01-01,,100,75.25,2024-03-01",
    ]);
    let pipeline = fx.pipeline();

    let summary = pipeline.run_full_import().await.expect("import");
    assert_eq!(summary.rent_roll.contracts_created, 1);
    assert_eq!(summary.rent_roll.invoices_created, 2);

    let tables = fx.tables().await;
    let contract = only_contract(&tables);
    let total: f64 = tables
        .invoices_of(contract.id)
        .iter()
        .map(|inv| inv.balance)
        .sum();
    assert_eq!(contract.current_amount_owed, 225.25);
    assert_eq!(contract.current_amount_owed, total);

    // A payment recorded against February lowers the aggregate on the next pass.
    fx.write_rent_roll(&["North Storage,A1,Jane,Doe,,,2024-01-01,,100,50,2024-02-01"]);
    let report = pipeline.import_rent_roll().await.expect("second run");
    assert_eq!(report.invoices_updated, 1);
    assert_eq!(report.contracts_updated, 1);
    let tables = fx.tables().await;
    assert_eq!(only_contract(&tables).current_amount_owed, 125.25);
}

#[tokio::test]
async fn monthly_rent_on_the_rent_roll_overrides_the_unit() {
    let fx = Fixture::new();
    fx.write_units(&["North Storage,A1,10x10x8,standard"]);
    fx.write_rent_roll(&["North Storage,A1,Jane,Doe,,,2024-01-01,,$95.50,0,"]);
    let pipeline = fx.pipeline();

    let summary = pipeline.run_full_import().await.expect("import");
    assert_eq!(summary.rent_roll.unit_rents_updated, 1);
    let tables = fx.tables().await;
    assert_eq!(
        tables.units.values().next().expect("unit").monthly_rent,
        Some(95.5)
    );

    // The unit file does not carry rent, so re-importing it keeps the override.
    let units = pipeline.import_units().await.expect("units again");
    assert_eq!(units.units_updated, 0);
    let tables = fx.tables().await;
    assert_eq!(
        tables.units.values().next().expect("unit").monthly_rent,
        Some(95.5)
    );
}

#[tokio::test]
async fn tenant_details_merge_across_rows() {
    let fx = Fixture::new();
    fx.write_units(&["North Storage,A1,10x10x8,standard", "North Storage,A2,10x10x8,standard"]);
    fx.write_rent_roll(&[
        "North Storage,A1,Jane,Doe,,jane@example.com,2024-01-01,,,0,",
        "North Storage,A2,Janet,Doe,555-0100,jane@example.com,2024-03-01,,,0,",
    ]);

    let summary = fx.pipeline().run_full_import().await.expect("import");
    assert_eq!(summary.rent_roll.tenants_created, 1);
    assert_eq!(summary.rent_roll.tenants_updated, 1);

    let tables = fx.tables().await;
    assert_eq!(tables.tenants.len(), 1);
    let tenant = tables.tenants.values().next().expect("tenant");
    assert_eq!(tenant.first_name, "Janet");
    assert_eq!(tenant.phone.as_deref(), Some("555-0100"));
    assert_eq!(tables.contracts.len(), 2);
}

/// Store whose sessions refuse to write invoices.
#[derive(Clone)]
struct InvoiceFailingStore {
    inner: MemoryStore,
}

#[async_trait]
impl Store for InvoiceFailingStore {
    async fn begin(&self) -> Result<Box<dyn ImportSession>, StoreError> {
        Ok(Box::new(InvoiceFailingSession {
            inner: self.inner.begin().await?,
        }))
    }
}

struct InvoiceFailingSession {
    inner: Box<dyn ImportSession>,
}

#[async_trait]
impl ImportSession for InvoiceFailingSession {
    async fn find_facility_by_name(&mut self, name: &str) -> Result<Option<Facility>, StoreError> {
        self.inner.find_facility_by_name(name).await
    }

    async fn insert_facility(&mut self, new: NewFacility) -> Result<Facility, StoreError> {
        self.inner.insert_facility(new).await
    }

    async fn find_unit(&mut self, key: &UnitKey) -> Result<Option<Unit>, StoreError> {
        self.inner.find_unit(key).await
    }

    async fn find_unit_by_facility_name(
        &mut self,
        key: &RentRollUnitKey,
    ) -> Result<Option<(Unit, Facility)>, StoreError> {
        self.inner.find_unit_by_facility_name(key).await
    }

    async fn insert_unit(&mut self, new: NewUnit) -> Result<Unit, StoreError> {
        self.inner.insert_unit(new).await
    }

    async fn update_unit(&mut self, unit: &Unit) -> Result<(), StoreError> {
        self.inner.update_unit(unit).await
    }

    async fn find_tenant(&mut self, key: &TenantKey) -> Result<Option<Tenant>, StoreError> {
        self.inner.find_tenant(key).await
    }

    async fn insert_tenant(&mut self, new: NewTenant) -> Result<Tenant, StoreError> {
        self.inner.insert_tenant(new).await
    }

    async fn update_tenant(&mut self, tenant: &Tenant) -> Result<(), StoreError> {
        self.inner.update_tenant(tenant).await
    }

    async fn find_contract(
        &mut self,
        key: &ContractKey,
    ) -> Result<Option<RentalContract>, StoreError> {
        self.inner.find_contract(key).await
    }

    async fn insert_contract(
        &mut self,
        new: NewRentalContract,
    ) -> Result<RentalContract, StoreError> {
        self.inner.insert_contract(new).await
    }

    async fn update_contract(&mut self, contract: &RentalContract) -> Result<(), StoreError> {
        self.inner.update_contract(contract).await
    }

    async fn invoices_for_contract(
        &mut self,
        contract_id: RentalContractId,
    ) -> Result<Vec<RentalInvoice>, StoreError> {
        self.inner.invoices_for_contract(contract_id).await
    }

    async fn insert_invoice(&mut self, new: NewRentalInvoice) -> Result<RentalInvoice, StoreError> {
        Err(StoreError::UniqueViolation {
            constraint: "rental_invoice_contract_due_date_key".into(),
            key: format!("({}, {})", new.contract_id, new.due_date),
        })
    }

    async fn update_invoice(&mut self, invoice: &RentalInvoice) -> Result<(), StoreError> {
        self.inner.update_invoice(invoice).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn store_failure_rolls_back_the_whole_file() {
    let fx = Fixture::new();
    fx.write_units(&["North Storage,A1,10x10x8,standard", "North Storage,A2,10x10x8,standard"]);
    fx.write_rent_roll(&[
        "North Storage,A1,Jane,Doe,,,2024-01-01,,120,0,",
        "North Storage,A2,John,Roe,,,2024-01-01,,80,80,2024-02-01",
    ]);
    fx.pipeline().import_units().await.expect("units");
    let before = fx.tables().await;

    let failing = InvoiceFailingStore {
        inner: fx.store.clone(),
    };
    let pipeline = ImportPipeline::new(fx.config.clone(), Arc::new(failing));
    let err = pipeline.import_rent_roll().await.unwrap_err();
    assert!(matches!(
        err,
        ImportError::Store {
            file: "rentRoll.csv",
            source: StoreError::UniqueViolation { .. }
        }
    ));

    // The first row's tenant, contract and rent override are gone with the rest.
    let after = fx.tables().await;
    assert!(after.tenants.is_empty());
    assert!(after.contracts.is_empty());
    assert_eq!(before.units, after.units);
    assert!(fx.error_log().contains("rentRoll.csv transaction rolled back"));
}

#[tokio::test]
async fn sample_fixtures_import_cleanly() {
    let log_dir = tempdir().expect("tempdir");
    let config = ImportConfig {
        database_url: String::new(),
        data_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures"),
        data_folder_name: "sample".into(),
        unit_file_name: "unit.csv".into(),
        rent_roll_file_name: "rentRoll.csv".into(),
        error_log: log_dir.path().join("migration-errors.log"),
    };
    let store = MemoryStore::new();
    let pipeline = ImportPipeline::new(config, Arc::new(store.clone()));

    let summary = pipeline.run_full_import().await.expect("import");
    assert_eq!(summary.units.rows, 5);
    assert_eq!(summary.units.facilities_created, 2);
    assert_eq!(summary.units.units_created, 4);
    assert_eq!(summary.units.skipped, 1);

    assert_eq!(summary.rent_roll.rows, 4);
    assert_eq!(summary.rent_roll.tenants_created, 3);
    assert_eq!(summary.rent_roll.contracts_created, 3);
    assert_eq!(summary.rent_roll.invoices_created, 2);
    assert_eq!(summary.rent_roll.unit_rents_updated, 3);
    assert_eq!(summary.rent_roll.skipped, 1);

    let tables = store.snapshot().await;
    let owed: f64 = tables.contracts.values().map(|c| c.current_amount_owed).sum();
    assert_eq!(owed, 245.0);
    assert!(tables
        .units
        .values()
        .any(|u| u.number == "1000" && u.monthly_rent == Some(1050.0)));
}
