//! Inventory - the facade collaborators call.
//!
//! Owns the lot index and the order arena, and expresses the dispatch
//! operations in terms of them: orders are always placed against the lot
//! with the nearest expiry date (first-expiry-first-out), cancellation
//! restores the reserved stock, and the whole state round-trips through the
//! persistence codec.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::arena::OrderArena;
use crate::codec::{self, MAX_NAME_BYTES};
use crate::error::{InventoryError, Result};
use crate::tree::{AvlIndex, NodeIndex};

/// Default lot capacity for `Inventory::default()`
pub const DEFAULT_LOT_CAPACITY: u32 = 4_096;
/// Default pending-order capacity for `Inventory::default()`
pub const DEFAULT_ORDER_CAPACITY: u32 = 65_536;

/// By-value view of one pending order
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderSnapshot {
    pub destination: String,
    pub quantity: u32,
}

/// By-value view of one lot and its pending orders
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LotSnapshot {
    /// Expiry date, YYYYMMDD
    pub expiry_date: u32,
    pub product: String,
    /// Unreserved stock
    pub stock: u32,
    /// Pending orders, oldest first
    pub orders: Vec<OrderSnapshot>,
}

/// Outcome of a successful dispatch
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DispatchReceipt {
    /// Expiry date of the lot the order was placed against
    pub expiry_date: u32,
    pub product: String,
    /// Stock remaining on that lot after the reservation
    pub remaining_stock: u32,
}

/// The perishable-goods inventory: an expiry-keyed lot index plus the pool
/// of pending dispatch orders.
pub struct Inventory {
    tree: AvlIndex,
    orders: OrderArena,
}

impl Inventory {
    /// Create an empty inventory with explicit arena capacities.
    pub fn new(lot_capacity: u32, order_capacity: u32) -> Self {
        Self {
            tree: AvlIndex::new(lot_capacity),
            orders: OrderArena::new(order_capacity),
        }
    }

    /// Number of lots held
    #[inline]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Total pending orders across all lots
    #[inline]
    pub fn pending_order_total(&self) -> usize {
        self.orders.allocated() as usize
    }

    // ========================================================================
    // Receiving
    // ========================================================================

    /// Register a newly received lot under its expiry date.
    ///
    /// The date must already be validated by the caller (see [`crate::date`]).
    /// Names longer than the persistable width are truncated to
    /// [`MAX_NAME_BYTES`] at a character boundary.
    pub fn insert_lot(&mut self, expiry_date: u32, product: &str, stock: u32) -> Result<()> {
        self.tree
            .insert(expiry_date, bound_name(product), stock)?;
        debug!(expiry_date, product, stock, "lot inserted");
        Ok(())
    }

    /// Register a batch of lots, one result per entry.
    ///
    /// Each lot is inserted independently; a duplicate date in the middle of
    /// the batch rejects that entry and leaves the rest unaffected.
    pub fn insert_lots<I>(&mut self, lots: I) -> Vec<Result<()>>
    where
        I: IntoIterator<Item = (u32, String, u32)>,
    {
        lots.into_iter()
            .map(|(date, product, stock)| self.insert_lot(date, &product, stock))
            .collect()
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Place an outbound order against the lot with the nearest expiry date.
    ///
    /// Fails with `NotFound` on an empty inventory and `InsufficientStock`
    /// when the lot cannot cover the quantity; neither failure mutates
    /// anything. On success the order is queued and the stock decremented
    /// within the same exclusive borrow, so no observer can see one without
    /// the other.
    pub fn dispatch(&mut self, destination: &str, quantity: u32) -> Result<DispatchReceipt> {
        let index = self
            .tree
            .minimum()
            .ok_or(InventoryError::NotFound("no inventory"))?;

        let available = self.tree.node(index).stock;
        if quantity > available {
            warn!(
                destination,
                quantity, available, "dispatch rejected: insufficient stock"
            );
            return Err(InventoryError::InsufficientStock {
                requested: quantity,
                available,
            });
        }

        let orders = &mut self.orders;
        let node = self.tree.node_mut(index);
        node.orders
            .push_back(orders, bound_name(destination), quantity)
            .ok_or(InventoryError::AllocationFailure)?;
        node.stock -= quantity;

        let receipt = DispatchReceipt {
            expiry_date: node.expiry_date,
            product: node.product.clone(),
            remaining_stock: node.stock,
        };
        debug!(
            expiry_date = receipt.expiry_date,
            destination,
            quantity,
            remaining = receipt.remaining_stock,
            "order dispatched"
        );
        Ok(receipt)
    }

    /// Cancel the first pending order on the given lot that matches both
    /// destination and quantity exactly.
    ///
    /// Restores the reserved quantity to the lot's stock and returns the new
    /// stock level. Fails with `NotFound` when the lot is absent or no order
    /// matches.
    pub fn cancel_order(
        &mut self,
        expiry_date: u32,
        destination: &str,
        quantity: u32,
    ) -> Result<u32> {
        let index = self
            .tree
            .search(expiry_date)
            .ok_or(InventoryError::NotFound("lot not found"))?;

        let orders = &mut self.orders;
        let node = self.tree.node_mut(index);
        let restored = node
            .orders
            .cancel(orders, destination, quantity)
            .ok_or(InventoryError::NotFound("no matching order"))?;
        node.stock += restored;

        debug!(expiry_date, destination, quantity, stock = node.stock, "order canceled");
        Ok(node.stock)
    }

    /// Remove a whole lot, releasing its pending orders.
    pub fn remove_lot(&mut self, expiry_date: u32) -> Result<()> {
        self.tree.delete(&mut self.orders, expiry_date)?;
        debug!(expiry_date, "lot removed");
        Ok(())
    }

    /// Drop every lot and order.
    pub fn clear(&mut self) {
        self.tree.clear(&mut self.orders);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Snapshot of the lot with this expiry date, if present.
    pub fn lot(&self, expiry_date: u32) -> Option<LotSnapshot> {
        self.tree
            .search(expiry_date)
            .map(|index| self.snapshot_of(index))
    }

    /// Snapshot of the lot dispatch would currently draw from.
    pub fn nearest_expiry(&self) -> Option<LotSnapshot> {
        self.tree.minimum().map(|index| self.snapshot_of(index))
    }

    /// Number of pending orders on the given lot, if present.
    pub fn pending_orders(&self, expiry_date: u32) -> Option<usize> {
        self.tree
            .search(expiry_date)
            .map(|index| self.tree.node(index).orders.len(&self.orders))
    }

    /// All lots in ascending expiry order, nearest first.
    pub fn report(&self) -> Vec<LotSnapshot> {
        let mut lots = Vec::with_capacity(self.len());
        self.tree.traverse_ascending(|node| {
            let orders = node
                .orders
                .iter(&self.orders)
                .map(|o| OrderSnapshot {
                    destination: o.destination.clone(),
                    quantity: o.quantity,
                })
                .collect();
            lots.push(LotSnapshot {
                expiry_date: node.expiry_date,
                product: node.product.clone(),
                stock: node.stock,
                orders,
            });
        });
        lots
    }

    /// Verify the index invariants (ordering, heights, balance).
    pub fn is_well_formed(&self) -> bool {
        self.tree.is_well_formed()
    }

    fn snapshot_of(&self, index: NodeIndex) -> LotSnapshot {
        let node = self.tree.node(index);
        LotSnapshot {
            expiry_date: node.expiry_date,
            product: node.product.clone(),
            stock: node.stock,
            orders: node
                .orders
                .iter(&self.orders)
                .map(|o| OrderSnapshot {
                    destination: o.destination.clone(),
                    quantity: o.quantity,
                })
                .collect(),
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write the whole inventory to `path`, truncating any existing file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        codec::save(&mut writer, &self.tree, &self.orders)?;
        info!(path = %path.display(), lots = self.len(), "inventory saved");
        Ok(())
    }

    /// Replace the in-memory state with the contents of `path`.
    ///
    /// A missing file is not an error: it loads as an empty inventory. A
    /// corrupt file fails with `CorruptPersistence` and leaves the current
    /// state untouched.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "no inventory file, starting empty");
                self.clear();
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let mut reader = BufReader::new(file);
        let (tree, orders) =
            codec::load(&mut reader, self.tree.capacity(), self.orders.capacity())?;

        self.tree = tree;
        self.orders = orders;
        info!(path = %path.display(), lots = self.len(), "inventory loaded");
        Ok(())
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new(DEFAULT_LOT_CAPACITY, DEFAULT_ORDER_CAPACITY)
    }
}

impl std::fmt::Debug for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inventory")
            .field("lots", &self.len())
            .field("pending_orders", &self.orders.allocated())
            .finish()
    }
}

/// Truncate a name to the persistable width at a character boundary.
fn bound_name(name: &str) -> String {
    if name.len() <= MAX_NAME_BYTES {
        return name.to_string();
    }
    let mut end = MAX_NAME_BYTES;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Inventory {
        let mut inv = Inventory::new(64, 64);
        inv.insert_lot(20251201, "Panela", 100).unwrap();
        inv.insert_lot(20251115, "Queso", 50).unwrap();
        inv.insert_lot(20251220, "Chontaduro", 30).unwrap();
        inv
    }

    #[test]
    fn test_empty_inventory() {
        let inv = Inventory::new(8, 8);
        assert!(inv.is_empty());
        assert_eq!(inv.len(), 0);
        assert!(inv.report().is_empty());
        assert_eq!(inv.nearest_expiry(), None);
    }

    #[test]
    fn test_insert_and_report_ascending() {
        let inv = seeded();
        let dates: Vec<u32> = inv.report().iter().map(|l| l.expiry_date).collect();
        assert_eq!(dates, [20251115, 20251201, 20251220]);
        assert_eq!(inv.nearest_expiry().unwrap().expiry_date, 20251115);
        assert!(inv.is_well_formed());
    }

    #[test]
    fn test_insert_duplicate_lot() {
        let mut inv = seeded();
        let err = inv.insert_lot(20251201, "Impostor", 1).unwrap_err();
        assert!(matches!(err, InventoryError::DuplicateKey(20251201)));

        let lot = inv.lot(20251201).unwrap();
        assert_eq!(lot.product, "Panela");
        assert_eq!(lot.stock, 100);
    }

    #[test]
    fn test_insert_lots_batch_reports_per_entry() {
        let mut inv = Inventory::new(8, 8);
        let results = inv.insert_lots([
            (20251201, "Panela".to_string(), 100),
            (20251201, "Duplicada".to_string(), 10),
            (20251115, "Queso".to_string(), 50),
        ]);

        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(InventoryError::DuplicateKey(20251201))
        ));
        assert!(results[2].is_ok());
        assert_eq!(inv.len(), 2);
    }

    #[test]
    fn test_dispatch_selects_nearest_expiry() {
        let mut inv = seeded();
        let receipt = inv.dispatch("Guapi", 20).unwrap();

        assert_eq!(receipt.expiry_date, 20251115);
        assert_eq!(receipt.product, "Queso");
        assert_eq!(receipt.remaining_stock, 30);

        let lot = inv.lot(20251115).unwrap();
        assert_eq!(lot.stock, 30);
        assert_eq!(lot.orders.len(), 1);
        assert_eq!(lot.orders[0].destination, "Guapi");
        assert_eq!(lot.orders[0].quantity, 20);

        // Other lots untouched
        assert_eq!(inv.lot(20251201).unwrap().stock, 100);
        assert_eq!(inv.lot(20251220).unwrap().stock, 30);
    }

    #[test]
    fn test_dispatch_empty_inventory() {
        let mut inv = Inventory::new(8, 8);
        let err = inv.dispatch("Guapi", 1).unwrap_err();
        assert!(matches!(err, InventoryError::NotFound("no inventory")));
    }

    #[test]
    fn test_dispatch_insufficient_stock_mutates_nothing() {
        let mut inv = seeded();
        let err = inv.dispatch("Guapi", 51).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientStock {
                requested: 51,
                available: 50
            }
        ));

        let lot = inv.lot(20251115).unwrap();
        assert_eq!(lot.stock, 50);
        assert!(lot.orders.is_empty());
        assert_eq!(inv.pending_order_total(), 0);
    }

    #[test]
    fn test_dispatch_order_pool_exhausted() {
        let mut inv = Inventory::new(8, 1);
        inv.insert_lot(20251115, "Queso", 50).unwrap();
        inv.dispatch("Guapi", 1).unwrap();

        let err = inv.dispatch("Tumaco", 1).unwrap_err();
        assert!(matches!(err, InventoryError::AllocationFailure));

        // The failed dispatch reserved nothing
        assert_eq!(inv.lot(20251115).unwrap().stock, 49);
        assert_eq!(inv.pending_orders(20251115), Some(1));
    }

    #[test]
    fn test_cancel_restores_stock() {
        let mut inv = seeded();
        inv.dispatch("Guapi", 20).unwrap();

        let stock = inv.cancel_order(20251115, "Guapi", 20).unwrap();
        assert_eq!(stock, 50);

        let lot = inv.lot(20251115).unwrap();
        assert_eq!(lot.stock, 50);
        assert!(lot.orders.is_empty());
    }

    #[test]
    fn test_cancel_missing_lot_or_order() {
        let mut inv = seeded();
        inv.dispatch("Guapi", 20).unwrap();

        let err = inv.cancel_order(19990101, "Guapi", 20).unwrap_err();
        assert!(matches!(err, InventoryError::NotFound("lot not found")));

        let err = inv.cancel_order(20251115, "Guapi", 21).unwrap_err();
        assert!(matches!(err, InventoryError::NotFound("no matching order")));

        // The unmatched cancels changed nothing
        assert_eq!(inv.lot(20251115).unwrap().stock, 30);
        assert_eq!(inv.pending_orders(20251115), Some(1));
    }

    #[test]
    fn test_remove_lot_releases_orders() {
        let mut inv = seeded();
        inv.dispatch("Guapi", 20).unwrap();
        assert_eq!(inv.pending_order_total(), 1);

        inv.remove_lot(20251115).unwrap();
        assert_eq!(inv.lot(20251115), None);
        assert_eq!(inv.len(), 2);
        assert_eq!(inv.pending_order_total(), 0);
        assert!(inv.is_well_formed());

        let err = inv.remove_lot(20251115).unwrap_err();
        assert!(matches!(err, InventoryError::NotFound(_)));
        assert_eq!(inv.len(), 2);
    }

    #[test]
    fn test_dispatch_moves_to_next_lot_after_removal() {
        let mut inv = seeded();
        inv.remove_lot(20251115).unwrap();

        let receipt = inv.dispatch("Guapi", 10).unwrap();
        assert_eq!(receipt.expiry_date, 20251201);
        assert_eq!(receipt.product, "Panela");
    }

    #[test]
    fn test_pending_orders_counts_by_walking() {
        let mut inv = seeded();
        assert_eq!(inv.pending_orders(20251115), Some(0));
        inv.dispatch("Guapi", 5).unwrap();
        inv.dispatch("Tumaco", 5).unwrap();
        assert_eq!(inv.pending_orders(20251115), Some(2));
        assert_eq!(inv.pending_orders(19990101), None);
    }

    #[test]
    fn test_long_names_are_bounded() {
        let mut inv = Inventory::new(8, 8);
        let long = "x".repeat(200);
        inv.insert_lot(20251201, &long, 10).unwrap();

        let lot = inv.lot(20251201).unwrap();
        assert_eq!(lot.product.len(), MAX_NAME_BYTES);
    }

    #[test]
    fn test_bound_name_respects_char_boundaries() {
        let multibyte = "é".repeat(40); // 80 bytes
        let bounded = bound_name(&multibyte);
        assert!(bounded.len() <= MAX_NAME_BYTES);
        assert!(bounded.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_clear() {
        let mut inv = seeded();
        inv.dispatch("Guapi", 5).unwrap();
        inv.clear();
        assert!(inv.is_empty());
        assert_eq!(inv.pending_order_total(), 0);
    }
}
