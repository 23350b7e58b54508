//! DEX operations: in-building item transfers, bids, asks and order
//! cancellations.
//!
//! Orders escrow upfront: placing a bid locks the coins, placing an ask
//! locks the items.  Matching pays the seller minus fees; the base fee is
//! destroyed and the building owner's cut is credited to the owner.

use serde_json::{json, Value};
use skarn_store::Id;
use tracing::info;

use crate::context::Context;
use crate::faction::Faction;
use crate::jsonutil;
use crate::params::{Amount, Quantity};
use crate::schema::dex::OrderType;
use crate::schema::Tables;

/// Why a DEX operation cannot be executed.  These are user-input errors:
/// callers log them and drop the intent, never abort the block.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DexError {
    #[error("building {0} does not exist")]
    UnknownBuilding(Id),

    #[error("building {0} is still a foundation")]
    InFoundation(Id),

    #[error("item {0} does not exist")]
    UnknownItem(String),

    #[error("only {got} of {item} available, {needed} required")]
    MissingItems {
        item: String,
        got: Quantity,
        needed: Quantity,
    },

    #[error("balance {balance} cannot cover the bid")]
    InsufficientBalance { balance: Amount },

    #[error("order {0} does not exist")]
    UnknownOrder(Id),

    #[error("order {order} belongs to {owner}")]
    ForeignOrder { order: Id, owner: String },
}

/// One parsed DEX operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DexOp {
    Transfer {
        building: Id,
        item: String,
        quantity: Quantity,
        recipient: String,
    },
    Bid {
        building: Id,
        item: String,
        quantity: Quantity,
        price: Amount,
    },
    Ask {
        building: Id,
        item: String,
        quantity: Quantity,
        price: Amount,
    },
    Cancel {
        order: Id,
    },
}

impl DexOp {
    /// Parses one entry of the `x` move array.  Returns `None` for anything
    /// malformed.
    pub fn parse(data: &Value) -> Option<DexOp> {
        let obj = data.as_object()?;

        // Order cancellation is the one-member special case.
        if obj.len() == 1 {
            let order = jsonutil::parse_id(obj.get("c")?)?;
            return Some(DexOp::Cancel { order });
        }

        if obj.len() != 4 {
            return None;
        }
        let building = jsonutil::parse_id(obj.get("b")?)?;
        let item = obj.get("i")?.as_str()?.to_string();
        let quantity = jsonutil::parse_quantity(obj.get("n")?)?;

        if let Some(recv) = obj.get("t") {
            let recipient = recv.as_str()?.to_string();
            return Some(DexOp::Transfer {
                building,
                item,
                quantity,
                recipient,
            });
        }
        if let Some(bp) = obj.get("bp") {
            let price = jsonutil::parse_coin_amount(bp)?;
            return Some(DexOp::Bid {
                building,
                item,
                quantity,
                price,
            });
        }
        if let Some(ap) = obj.get("ap") {
            let price = jsonutil::parse_coin_amount(ap)?;
            return Some(DexOp::Ask {
                building,
                item,
                quantity,
                price,
            });
        }

        None
    }

    /// Shared validity of building-and-item operations.
    fn validate_item_op(
        tables: &Tables,
        ctx: &Context,
        building: Id,
        item: &str,
    ) -> Result<(), DexError> {
        match tables.buildings.read(building, |b| b.proto.foundation) {
            None => return Err(DexError::UnknownBuilding(building)),
            Some(true) => return Err(DexError::InFoundation(building)),
            Some(false) => (),
        }
        if ctx.params().item(item).is_none() {
            return Err(DexError::UnknownItem(item.to_string()));
        }
        Ok(())
    }

    /// Checks whether this operation can be executed for the account.
    pub fn validate(&self, account: &str, tables: &Tables, ctx: &Context) -> Result<(), DexError> {
        match self {
            DexOp::Transfer {
                building,
                item,
                quantity,
                ..
            }
            | DexOp::Ask {
                building,
                item,
                quantity,
                ..
            } => {
                Self::validate_item_op(tables, ctx, *building, item)?;
                let got = tables.building_inv.count_in(*building, account, item);
                if got < *quantity {
                    return Err(DexError::MissingItems {
                        item: item.clone(),
                        got,
                        needed: *quantity,
                    });
                }
                Ok(())
            }

            DexOp::Bid {
                building,
                item,
                quantity,
                price,
            } => {
                Self::validate_item_op(tables, ctx, *building, item)?;
                let balance = tables.accounts.read(account, |a| a.balance).unwrap_or(0);
                // The product can exceed 64 bits for absurd inputs; widen
                // before comparing so such bids are rejected, not wrapped.
                if *quantity as i128 * *price as i128 > balance as i128 {
                    return Err(DexError::InsufficientBalance { balance });
                }
                Ok(())
            }

            DexOp::Cancel { order } => {
                match tables.orders.read(*order, |r| r.account.clone()) {
                    None => Err(DexError::UnknownOrder(*order)),
                    Some(owner) if owner != account => Err(DexError::ForeignOrder {
                        order: *order,
                        owner,
                    }),
                    Some(_) => Ok(()),
                }
            }
        }
    }

    /// Executes a validated operation.
    pub fn execute(&self, account: &str, tables: &Tables, ctx: &Context) {
        match self {
            DexOp::Transfer {
                building,
                item,
                quantity,
                recipient,
            } => execute_transfer(tables, account, *building, item, *quantity, recipient),
            DexOp::Bid {
                building,
                item,
                quantity,
                price,
            } => execute_bid(tables, ctx, account, *building, item, *quantity, *price),
            DexOp::Ask {
                building,
                item,
                quantity,
                price,
            } => execute_ask(tables, ctx, account, *building, item, *quantity, *price),
            DexOp::Cancel { order } => execute_cancel(tables, account, *order),
        }
    }

    /// The JSON form used in the pending-state projection.
    pub fn pending_json(&self) -> Value {
        match self {
            DexOp::Transfer {
                building,
                item,
                quantity,
                recipient,
            } => json!({
                "op": "transfer",
                "building": building,
                "item": item,
                "num": quantity,
                "to": recipient,
            }),
            DexOp::Bid {
                building,
                item,
                quantity,
                price,
            } => json!({
                "op": "bid",
                "building": building,
                "item": item,
                "num": quantity,
                "price": price,
            }),
            DexOp::Ask {
                building,
                item,
                quantity,
                price,
            } => json!({
                "op": "ask",
                "building": building,
                "item": item,
                "num": quantity,
                "price": price,
            }),
            DexOp::Cancel { order } => json!({
                "op": "cancel",
                "order": order,
            }),
        }
    }
}

/// Credits coins, creating the recipient account if needed.
fn pay_coins(tables: &Tables, recipient: &str, amount: Amount) {
    if amount == 0 {
        return;
    }
    let mut a = tables
        .accounts
        .get(recipient)
        .unwrap_or_else(|| tables.accounts.create(recipient));
    a.add_balance(amount);
}

/// Pays a seller for a fill, splitting off the fees: the base fee is burnt
/// and the building owner's share is credited to the owner.
///
/// The total fee rounds up (one extra minor unit at most per fill, so fees
/// cannot be dodged by splitting orders); the owner's share rounds down.
fn pay_to_seller_and_fee(tables: &Tables, ctx: &Context, building: Id, seller: &str, cost: Amount) {
    let (owner, owner_bps, faction) = tables
        .buildings
        .read(building, |b| {
            (
                b.owner.clone(),
                b.proto.config.dex_fee_bps.unwrap_or(0),
                b.faction,
            )
        })
        .expect("trade in existing building");
    if faction == Faction::Ancient {
        assert_eq!(owner_bps, 0, "Ancient building has a dex fee");
    }

    let base_bps = ctx.params().dex_base_fee_bps;
    let total_bps = (base_bps + owner_bps) as i128;

    let total = ((cost as i128 * total_bps + 9_999) / 10_000) as Amount;
    let owner_cut = ((cost as i128 * owner_bps as i128) / 10_000) as Amount;
    let payout = cost - total;
    assert!(payout >= 0 && owner_cut + payout <= cost);

    if owner_cut > 0 {
        pay_coins(tables, &owner, owner_cut);
    }
    tables.money.burn_fee(total - owner_cut);
    pay_coins(tables, seller, payout);
}

fn execute_transfer(
    tables: &Tables,
    account: &str,
    building: Id,
    item: &str,
    quantity: Quantity,
    recipient: &str,
) {
    info!(
        account,
        recipient, building, item, quantity, "transferring items in building"
    );

    if recipient == account {
        return;
    }
    if !tables.accounts.contains(recipient) {
        tables.accounts.create(recipient);
    }

    tables
        .building_inv
        .get(building, account)
        .payload_mut()
        .add(item, -quantity);
    tables
        .building_inv
        .get(building, recipient)
        .payload_mut()
        .add(item, quantity);
}

fn execute_bid(
    tables: &Tables,
    ctx: &Context,
    account: &str,
    building: Id,
    item: &str,
    quantity: Quantity,
    price: Amount,
) {
    let mut remaining = quantity;
    for ask in tables.orders.ids_to_match_bid(building, item, price) {
        if remaining == 0 {
            break;
        }
        let order = tables.orders.get(ask).expect("matched order exists");
        let (seller, ask_price, available) = {
            let r = order.row();
            (r.account.clone(), r.price, r.quantity)
        };
        let filled = remaining.min(available);

        // The sold items were escrowed when the ask was placed, so only the
        // buyer side and the payment move now.
        tables
            .building_inv
            .get(building, account)
            .payload_mut()
            .add(item, filled);

        let cost = filled * ask_price;
        pay_to_seller_and_fee(tables, ctx, building, &seller, cost);
        let mut buyer = tables.accounts.get(account).expect("buyer exists");
        buyer.add_balance(-cost);
        drop(buyer);

        tables.trades.record_trade(
            ctx.height(),
            ctx.timestamp(),
            building,
            item,
            filled,
            ask_price,
            &seller,
            account,
        );

        order.reduce_quantity(filled);
        remaining -= filled;
    }

    if remaining == 0 {
        return;
    }

    let order = tables.orders.create(
        tables.ids.next_id(),
        building,
        account,
        OrderType::Bid,
        item,
        remaining,
        price,
    );
    info!(account, building, item, remaining, id = order.id(), "bid rests on the book");
    drop(order);

    let mut buyer = tables.accounts.get(account).expect("buyer exists");
    buyer.add_balance(-(remaining * price));
}

fn execute_ask(
    tables: &Tables,
    ctx: &Context,
    account: &str,
    building: Id,
    item: &str,
    quantity: Quantity,
    price: Amount,
) {
    let mut remaining = quantity;
    for bid in tables.orders.ids_to_match_ask(building, item, price) {
        if remaining == 0 {
            break;
        }
        let order = tables.orders.get(bid).expect("matched order exists");
        let (buyer, bid_price, available) = {
            let r = order.row();
            (r.account.clone(), r.price, r.quantity)
        };
        let filled = remaining.min(available);

        // The coins were escrowed when the bid was placed; the items move
        // from the seller to the buyer and the seller gets paid.
        tables
            .building_inv
            .get(building, account)
            .payload_mut()
            .add(item, -filled);
        tables
            .building_inv
            .get(building, &buyer)
            .payload_mut()
            .add(item, filled);

        let cost = filled * bid_price;
        pay_to_seller_and_fee(tables, ctx, building, account, cost);

        tables.trades.record_trade(
            ctx.height(),
            ctx.timestamp(),
            building,
            item,
            filled,
            bid_price,
            account,
            &buyer,
        );

        order.reduce_quantity(filled);
        remaining -= filled;
    }

    if remaining == 0 {
        return;
    }

    let order = tables.orders.create(
        tables.ids.next_id(),
        building,
        account,
        OrderType::Ask,
        item,
        remaining,
        price,
    );
    info!(account, building, item, remaining, id = order.id(), "ask rests on the book");
    drop(order);

    tables
        .building_inv
        .get(building, account)
        .payload_mut()
        .add(item, -remaining);
}

fn execute_cancel(tables: &Tables, account: &str, order_id: Id) {
    let order = tables.orders.get(order_id).expect("validated order exists");
    let row = order.row().clone();
    info!(account, order = order_id, building = row.building, "cancelling order");

    match row.order_type {
        OrderType::Bid => {
            pay_coins(tables, &row.account, row.quantity * row.price);
        }
        OrderType::Ask => {
            tables
                .building_inv
                .get(row.building, &row.account)
                .payload_mut()
                .add(&row.item, row.quantity);
        }
    }

    order.delete();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::GridMap;
    use crate::params::{Chain, Params};
    use serde_json::json;

    struct Fixture {
        params: Params,
        map: GridMap,
        tables: Tables,
    }

    impl Fixture {
        fn new() -> Self {
            let fx = Self {
                params: Params::new(Chain::Regtest),
                map: GridMap::default(),
                tables: Tables::new(),
            };

            let mut b = fx.tables.buildings.create(1, "workshop", "owner", Faction::Red);
            b.proto_mut().age_data.finished_height = Some(0);
            drop(b);
            for name in ["owner", "buyer", "seller"] {
                fx.tables.accounts.create(name).set_faction(Faction::Red);
            }
            fx
        }

        fn ctx(&self) -> Context<'_> {
            Context::new(&self.params, &self.map, 100, 1_500_000_000)
        }

        fn run(&self, account: &str, op: &DexOp) -> bool {
            let ctx = self.ctx();
            if op.validate(account, &self.tables, &ctx).is_err() {
                return false;
            }
            op.execute(account, &self.tables, &ctx);
            true
        }

        fn balance(&self, name: &str) -> Amount {
            self.tables.accounts.read(name, |a| a.balance).unwrap()
        }
    }

    #[test]
    fn parsing() {
        assert_eq!(
            DexOp::parse(&json!({"b": 1, "i": "foo", "n": 10, "bp": 5})),
            Some(DexOp::Bid {
                building: 1,
                item: "foo".to_string(),
                quantity: 10,
                price: 5,
            })
        );
        assert_eq!(
            DexOp::parse(&json!({"c": 7})),
            Some(DexOp::Cancel { order: 7 })
        );
        assert_eq!(DexOp::parse(&json!({"b": 1, "i": "foo", "n": 10})), None);
        assert_eq!(
            DexOp::parse(&json!({"b": 1, "i": "foo", "n": 10, "bp": 5, "ap": 6})),
            None
        );
        assert_eq!(DexOp::parse(&json!([])), None);
        assert_eq!(
            DexOp::parse(&json!({"b": 1, "i": "foo", "n": 0, "bp": 5})),
            None
        );
    }

    #[test]
    fn resting_bid_escrows_coins() {
        let fx = Fixture::new();
        fx.tables.gift_coins("buyer", 1_000);

        assert!(fx.run(
            "buyer",
            &DexOp::Bid {
                building: 1,
                item: "foo".to_string(),
                quantity: 10,
                price: 30,
            }
        ));
        assert_eq!(fx.balance("buyer"), 700);
        assert_eq!(fx.tables.orders.ids_for_building(1).len(), 1);

        // Not enough balance for another such bid.
        assert!(!fx.run(
            "buyer",
            &DexOp::Bid {
                building: 1,
                item: "foo".to_string(),
                quantity: 100,
                price: 30,
            }
        ));
    }

    #[test]
    fn matching_trade_pays_fees() {
        let fx = Fixture::new();
        fx.tables.gift_coins("buyer", 1_000_000);
        fx.tables
            .building_inv
            .get(1, "seller")
            .payload_mut()
            .add("foo", 100);
        fx.tables
            .buildings
            .get(1)
            .unwrap()
            .proto_mut()
            .config
            .dex_fee_bps = Some(100);

        assert!(fx.run(
            "buyer",
            &DexOp::Bid {
                building: 1,
                item: "foo".to_string(),
                quantity: 100,
                price: 100,
            }
        ));
        // No ask yet: the bid rests.
        assert_eq!(fx.balance("buyer"), 1_000_000 - 10_000);

        assert!(fx.run(
            "seller",
            &DexOp::Ask {
                building: 1,
                item: "foo".to_string(),
                quantity: 100,
                price: 100,
            }
        ));

        // Base fee 1000 bps burnt, owner fee 100 bps credited.
        assert_eq!(fx.balance("seller"), 10_000 - 1_100);
        assert_eq!(fx.balance("owner"), 100);
        assert_eq!(fx.tables.money.get("burntfees"), 1_000);
        assert_eq!(fx.tables.building_inv.count_in(1, "buyer", "foo"), 100);
        assert!(fx.tables.orders.ids_for_building(1).is_empty());

        let trades = fx.tables.trades.trades_for("foo", 1);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].quantity, 100);
        assert_eq!(trades[0].buyer, "buyer");
        assert_eq!(trades[0].seller, "seller");
    }

    #[test]
    fn partial_fills_leave_remainder_on_book() {
        let fx = Fixture::new();
        fx.tables.gift_coins("buyer", 10_000);
        fx.tables
            .building_inv
            .get(1, "seller")
            .payload_mut()
            .add("foo", 30);

        assert!(fx.run(
            "seller",
            &DexOp::Ask {
                building: 1,
                item: "foo".to_string(),
                quantity: 30,
                price: 10,
            }
        ));
        assert!(fx.run(
            "buyer",
            &DexOp::Bid {
                building: 1,
                item: "foo".to_string(),
                quantity: 100,
                price: 10,
            }
        ));

        assert_eq!(fx.tables.building_inv.count_in(1, "buyer", "foo"), 30);
        // 70 remain as a resting bid with escrowed coins.
        assert_eq!(fx.balance("buyer"), 10_000 - 300 - 700);
        let reserved = fx.tables.orders.reserved_coins();
        assert_eq!(reserved.get("buyer"), Some(&700));
    }

    #[test]
    fn cancel_refunds_escrow() {
        let fx = Fixture::new();
        fx.tables.gift_coins("buyer", 1_000);
        assert!(fx.run(
            "buyer",
            &DexOp::Bid {
                building: 1,
                item: "foo".to_string(),
                quantity: 10,
                price: 30,
            }
        ));
        let order = fx.tables.orders.ids_for_building(1)[0];

        // Only the owner can cancel.
        assert!(!fx.run("seller", &DexOp::Cancel { order }));
        assert!(fx.run("buyer", &DexOp::Cancel { order }));
        assert_eq!(fx.balance("buyer"), 1_000);
        assert!(fx.tables.orders.get(order).is_none());
    }

    #[test]
    fn transfers_move_items() {
        let fx = Fixture::new();
        fx.tables
            .building_inv
            .get(1, "seller")
            .payload_mut()
            .add("foo", 10);

        assert!(fx.run(
            "seller",
            &DexOp::Transfer {
                building: 1,
                item: "foo".to_string(),
                quantity: 4,
                recipient: "newguy".to_string(),
            }
        ));
        assert_eq!(fx.tables.building_inv.count_in(1, "seller", "foo"), 6);
        assert_eq!(fx.tables.building_inv.count_in(1, "newguy", "foo"), 4);
        assert!(fx.tables.accounts.contains("newguy"));
    }

    #[test]
    fn foundation_rejects_operations() {
        let fx = Fixture::new();
        let mut b = fx.tables.buildings.create(2, "hut", "owner", Faction::Red);
        b.proto_mut().foundation = true;
        drop(b);

        assert!(!fx.run(
            "seller",
            &DexOp::Ask {
                building: 2,
                item: "foo".to_string(),
                quantity: 1,
                price: 1,
            }
        ));
    }
}
