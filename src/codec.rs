//! Persistence codec - flat-file encoding of the whole lot index.
//!
//! The tree is written pre-order so a reader can create each node before it
//! needs the children's data. Records have a fixed little-endian layout:
//! per node `i32` expiry date (`-1` marks an absent child and terminates
//! that branch), a 64-byte NUL-padded product name, `i32` stock, `i32`
//! order count, then each pending order as a 64-byte destination plus `i32`
//! quantity, then the left and right subtrees.
//!
//! The stock field holds the net stock at save time, already reduced by
//! every pending order; load restores it verbatim.

use std::io::{self, Read, Write};

use crate::arena::{OrderArena, NIL};
use crate::error::{InventoryError, Result};
use crate::tree::{AvlIndex, NodeIndex};

/// Width of the fixed name fields, including space for the NUL terminator
pub const NAME_FIELD: usize = 64;

/// Longest name that survives a round-trip
pub const MAX_NAME_BYTES: usize = NAME_FIELD - 1;

/// Written in place of every absent child; never a valid expiry date
const ABSENT: i32 = -1;

/// Serialize the whole index pre-order into `writer`.
pub fn save<W: Write>(writer: &mut W, tree: &AvlIndex, orders: &OrderArena) -> io::Result<()> {
    save_node(writer, tree, orders, tree.root())
}

fn save_node<W: Write>(
    writer: &mut W,
    tree: &AvlIndex,
    orders: &OrderArena,
    index: NodeIndex,
) -> io::Result<()> {
    if index == NIL {
        return write_i32(writer, ABSENT);
    }

    let node = tree.node(index);
    write_i32(writer, node.expiry_date as i32)?;
    write_name(writer, &node.product)?;
    write_i32(writer, node.stock as i32)?;

    write_i32(writer, node.orders.len(orders) as i32)?;
    for order in node.orders.iter(orders) {
        write_name(writer, &order.destination)?;
        write_i32(writer, order.quantity as i32)?;
    }

    let (left, right) = tree.children(index);
    save_node(writer, tree, orders, left)?;
    save_node(writer, tree, orders, right)
}

/// Reconstruct an index from `reader` into fresh arenas.
///
/// Any truncated or malformed record aborts the whole load with
/// `CorruptPersistence`; the partially built structure is dropped, so no
/// half-built tree ever becomes visible. Bytes after the root's encoding
/// are ignored.
pub fn load<R: Read>(
    reader: &mut R,
    lot_capacity: u32,
    order_capacity: u32,
) -> Result<(AvlIndex, OrderArena)> {
    let mut tree = AvlIndex::new(lot_capacity);
    let mut orders = OrderArena::new(order_capacity);

    let root = read_node(reader, &mut tree, &mut orders)?;
    tree.set_root(root);

    // A file that decodes but does not form a balanced search tree cannot
    // have been produced by `save`.
    if !tree.is_well_formed() {
        return Err(InventoryError::corrupt("nodes do not form a balanced index"));
    }

    Ok((tree, orders))
}

fn read_node<R: Read>(
    reader: &mut R,
    tree: &mut AvlIndex,
    orders: &mut OrderArena,
) -> Result<NodeIndex> {
    let key = read_i32(reader)?;
    if key == ABSENT {
        return Ok(NIL);
    }
    if key < 0 {
        return Err(InventoryError::corrupt(format!("invalid expiry date {key}")));
    }

    let product = read_name(reader)?;
    let stock = read_i32(reader)?;
    if stock < 0 {
        return Err(InventoryError::corrupt(format!("negative stock {stock}")));
    }
    let order_count = read_i32(reader)?;
    if order_count < 0 {
        return Err(InventoryError::corrupt(format!(
            "negative order count {order_count}"
        )));
    }

    let index = tree
        .alloc_node(key as u32, product, stock as u32)
        .ok_or(InventoryError::AllocationFailure)?;

    for _ in 0..order_count {
        let destination = read_name(reader)?;
        let quantity = read_i32(reader)?;
        if quantity <= 0 {
            return Err(InventoryError::corrupt(format!(
                "order quantity {quantity} must be positive"
            )));
        }
        tree.node_mut(index)
            .orders
            .push_back(orders, destination, quantity as u32)
            .ok_or(InventoryError::AllocationFailure)?;
    }

    let left = read_node(reader, tree, orders)?;
    let right = read_node(reader, tree, orders)?;
    tree.link_children(index, left, right);
    tree.set_height_from_children(index);

    Ok(index)
}

fn write_i32<W: Write>(writer: &mut W, value: i32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

fn write_name<W: Write>(writer: &mut W, name: &str) -> io::Result<()> {
    debug_assert!(name.len() <= MAX_NAME_BYTES, "name exceeds field width");
    let bytes = name.as_bytes();
    let len = bytes.len().min(MAX_NAME_BYTES);
    let mut field = [0u8; NAME_FIELD];
    field[..len].copy_from_slice(&bytes[..len]);
    writer.write_all(&field)
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(map_read_err)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_name<R: Read>(reader: &mut R) -> Result<String> {
    let mut field = [0u8; NAME_FIELD];
    reader.read_exact(&mut field).map_err(map_read_err)?;

    let len = field
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| InventoryError::corrupt("unterminated name field"))?;
    let name = std::str::from_utf8(&field[..len])
        .map_err(|_| InventoryError::corrupt("name field is not valid utf-8"))?;

    Ok(name.to_string())
}

fn map_read_err(err: io::Error) -> InventoryError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        InventoryError::corrupt("truncated record")
    } else {
        InventoryError::Io(err)
    }
}
