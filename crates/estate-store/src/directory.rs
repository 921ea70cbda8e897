use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use estate_core::{
    Complaint, Directory, Intervention, Lease, Mandate, SettlementError, SettlementResult, Unit,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Records {
    units: HashMap<Uuid, Unit>,
    leases: HashMap<Uuid, Lease>,
    mandates: Vec<Mandate>,
    interventions: HashMap<Uuid, Intervention>,
    complaints: HashMap<Uuid, Complaint>,
}

/// Directory backed by plain maps, filled by the caller.
#[derive(Default)]
pub struct InMemoryDirectory {
    records: RwLock<Records>,
}

impl InMemoryDirectory {
    pub async fn put_unit(&self, unit: Unit) {
        self.records.write().await.units.insert(unit.id, unit);
    }

    pub async fn put_lease(&self, lease: Lease) {
        self.records.write().await.leases.insert(lease.id, lease);
    }

    pub async fn put_mandate(&self, mandate: Mandate) {
        let mut records = self.records.write().await;
        records.mandates.retain(|existing| existing.id != mandate.id);
        records.mandates.push(mandate);
    }

    pub async fn put_intervention(&self, intervention: Intervention) {
        self.records
            .write()
            .await
            .interventions
            .insert(intervention.id, intervention);
    }

    pub async fn put_complaint(&self, complaint: Complaint) {
        self.records
            .write()
            .await
            .complaints
            .insert(complaint.id, complaint);
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn get_unit(&self, id: Uuid) -> SettlementResult<Unit> {
        let records = self.records.read().await;
        records
            .units
            .get(&id)
            .cloned()
            .ok_or_else(|| SettlementError::not_found("unit", id))
    }

    async fn get_lease(&self, id: Uuid) -> SettlementResult<Lease> {
        let records = self.records.read().await;
        records
            .leases
            .get(&id)
            .cloned()
            .ok_or_else(|| SettlementError::not_found("lease", id))
    }

    async fn get_intervention(&self, id: Uuid) -> SettlementResult<Intervention> {
        let records = self.records.read().await;
        records
            .interventions
            .get(&id)
            .cloned()
            .ok_or_else(|| SettlementError::not_found("intervention", id))
    }

    async fn get_complaint(&self, id: Uuid) -> SettlementResult<Complaint> {
        let records = self.records.read().await;
        records
            .complaints
            .get(&id)
            .cloned()
            .ok_or_else(|| SettlementError::not_found("complaint", id))
    }

    async fn get_mandate(
        &self,
        owner_id: Uuid,
        date: NaiveDate,
    ) -> SettlementResult<Option<Mandate>> {
        let records = self.records.read().await;
        Ok(records
            .mandates
            .iter()
            .filter(|mandate| mandate.owner_id == owner_id && mandate.is_active_on(date))
            .max_by_key(|mandate| mandate.start_date)
            .cloned())
    }

    async fn get_mandates(&self, owner_id: Uuid, date: NaiveDate) -> SettlementResult<Vec<Mandate>> {
        let records = self.records.read().await;
        let mut mandates: Vec<Mandate> = records
            .mandates
            .iter()
            .filter(|mandate| mandate.owner_id == owner_id && mandate.is_active_on(date))
            .cloned()
            .collect();
        mandates.sort_by_key(|mandate| (std::cmp::Reverse(mandate.start_date), mandate.id));
        Ok(mandates)
    }

    async fn get_active_leases_for_unit(
        &self,
        unit_id: Uuid,
        date: NaiveDate,
    ) -> SettlementResult<Vec<Lease>> {
        let records = self.records.read().await;
        let mut leases: Vec<Lease> = records
            .leases
            .values()
            .filter(|lease| lease.unit_id == unit_id && lease.is_active_on(date))
            .cloned()
            .collect();
        leases.sort_by_key(|lease| (lease.start_date, lease.id));
        Ok(leases)
    }

    async fn get_leases_for_unit(&self, unit_id: Uuid) -> SettlementResult<Vec<Lease>> {
        let records = self.records.read().await;
        let mut leases: Vec<Lease> = records
            .leases
            .values()
            .filter(|lease| lease.unit_id == unit_id)
            .cloned()
            .collect();
        leases.sort_by_key(|lease| (lease.start_date, lease.id));
        Ok(leases)
    }

    async fn owners_with_mandates(&self, date: NaiveDate) -> SettlementResult<Vec<Uuid>> {
        let records = self.records.read().await;
        let owners: BTreeSet<Uuid> = records
            .mandates
            .iter()
            .filter(|mandate| mandate.is_active_on(date))
            .map(|mandate| mandate.owner_id)
            .collect();
        Ok(owners.into_iter().collect())
    }
}
