pub mod allocation;
pub mod composer;
pub mod consumption;
pub mod events;
pub mod ledger;
pub mod meter_chain;
pub mod overdue;
pub mod proration;
