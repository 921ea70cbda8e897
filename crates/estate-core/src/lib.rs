pub mod error;
pub mod events;
pub mod models;
pub mod period;
pub mod policy;
pub mod storage;

pub use error::{SettlementError, SettlementResult};
pub use events::{SettlementEvent, SettlementEventKind};
pub use models::{
    ChargeEntry, ChargeLine, ChargePayer, ChargeTarget, ChargeTargetKind, Complaint, FeeLine,
    FranchiseRule, Intervention, Lease, LiquidationBreakdown, LiquidationSnapshot, Mandate,
    NewCharge, ObligationStatus, OwnershipShare, PayerKind, PaymentObligation, PaymentReceipt,
    PersistMode, RentLine, ShareInput, SnapshotKey, SnapshotStatus, Unit,
};
pub use policy::SettlementPolicy;
pub use storage::{
    ChargeStore, Clock, Directory, EventEnvelope, EventStore, FranchiseStore, ObligationStore,
    ShareStore, SnapshotStore,
};
