pub mod container_log;
pub mod dispense_event;
pub mod dispense_log;
pub mod inventory_container;
pub mod inventory_item;
pub mod inventory_purchase;
pub mod item_log;
pub mod purchase_log;
