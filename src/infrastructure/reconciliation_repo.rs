use std::collections::HashMap;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{Text, Timestamptz};
use uuid::Uuid;

use crate::domain::errors::{DomainError, GatewayError};
use crate::domain::lock::{LockLease, LOCK_ID};
use crate::domain::order::{LineItem, OrderBatch, OrderRecord, OrderStatus};
use crate::domain::ports::{LockStore, PaymentGateway, ReconciliationStore};
use crate::domain::reconciliation::{AuditEntry, Correction, CorrectionField};
use crate::domain::ticket::TicketRecord;
use crate::schema::{
    catalog_prices, order_line_items, orders, reconciliation_audit, reconciliation_locks, tickets,
};

use super::models::{LineItemRow, LockRow, NewAuditRow, OrderRow, TicketRow};
use super::pg_store::PgStore;

#[derive(QueryableByName)]
struct LockHolder {
    #[diesel(sql_type = Text)]
    holder: String,
}

// Takes over the row only when the current lease has expired, in a single
// statement. A live lease makes the WHERE false and no row comes back.
const ACQUIRE_LOCK_SQL: &str = "\
    INSERT INTO reconciliation_locks (id, holder, acquired_at, expires_at) \
    VALUES ($1, $2, $3, $4) \
    ON CONFLICT (id) DO UPDATE SET \
        holder = EXCLUDED.holder, \
        acquired_at = EXCLUDED.acquired_at, \
        expires_at = EXCLUDED.expires_at \
    WHERE reconciliation_locks.expires_at <= EXCLUDED.acquired_at \
    RETURNING holder";

impl LockStore for PgStore {
    fn try_acquire(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let mut conn = self.pool.get()?;
        let winner = diesel::sql_query(ACQUIRE_LOCK_SQL)
            .bind::<Text, _>(LOCK_ID)
            .bind::<Text, _>(holder)
            .bind::<Timestamptz, _>(now)
            .bind::<Timestamptz, _>(expires_at)
            .get_result::<LockHolder>(&mut conn)
            .optional()?;
        Ok(winner.is_some_and(|w| w.holder == holder))
    }

    fn release(&self, holder: &str) -> Result<bool, DomainError> {
        let mut conn = self.pool.get()?;
        let deleted = diesel::delete(
            reconciliation_locks::table
                .filter(reconciliation_locks::id.eq(LOCK_ID))
                .filter(reconciliation_locks::holder.eq(holder)),
        )
        .execute(&mut conn)?;
        Ok(deleted > 0)
    }

    fn current(&self) -> Result<Option<LockLease>, DomainError> {
        let mut conn = self.pool.get()?;
        Ok(reconciliation_locks::table
            .find(LOCK_ID)
            .select(LockRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(LockLease::from))
    }
}

fn insert_audit(conn: &mut PgConnection, audit: &AuditEntry) -> Result<(), DomainError> {
    diesel::insert_into(reconciliation_audit::table)
        .values(&NewAuditRow::from(audit))
        .execute(conn)?;
    Ok(())
}

impl ReconciliationStore for PgStore {
    fn orphan_tickets_created_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<TicketRecord>, DomainError> {
        let mut conn = self.pool.get()?;
        tickets::table
            .filter(tickets::order_id.is_null())
            .filter(tickets::created_at.ge(since))
            .order(tickets::created_at.asc())
            .select(TicketRow::as_select())
            .load(&mut conn)?
            .into_iter()
            .map(TicketRecord::try_from)
            .collect()
    }

    fn line_items_referencing_ticket(&self, ticket_id: Uuid) -> Result<Vec<LineItem>, DomainError> {
        let mut conn = self.pool.get()?;
        Ok(order_line_items::table
            .filter(order_line_items::ticket_id.eq(ticket_id))
            .select(LineItemRow::as_select())
            .load(&mut conn)?
            .into_iter()
            .map(LineItem::from)
            .collect())
    }

    fn link_orphan_ticket(
        &self,
        ticket_id: Uuid,
        order_id: Uuid,
        audit: &AuditEntry,
    ) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        conn.transaction::<_, DomainError, _>(|conn| {
            let linked = diesel::update(
                tickets::table
                    .filter(tickets::id.eq(ticket_id))
                    .filter(tickets::order_id.is_null()),
            )
            .set(tickets::order_id.eq(order_id))
            .execute(conn)?;
            if linked == 0 {
                return Err(DomainError::Conflict(format!(
                    "ticket {ticket_id} is not orphaned"
                )));
            }
            insert_audit(conn, audit)
        })
    }

    fn pending_orders_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OrderRecord>, DomainError> {
        let mut conn = self.pool.get()?;
        orders::table
            .filter(orders::status.eq(OrderStatus::Pending.as_str()))
            .filter(orders::created_at.between(from, to))
            .order(orders::created_at.asc())
            .select(OrderRow::as_select())
            .load(&mut conn)?
            .into_iter()
            .map(OrderRecord::try_from)
            .collect()
    }

    fn pending_order_batches_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<OrderBatch>, DomainError> {
        let mut conn = self.pool.get()?;
        let order_rows = orders::table
            .filter(orders::status.eq(OrderStatus::Pending.as_str()))
            .filter(orders::created_at.ge(since))
            .order(orders::created_at.asc())
            .select(OrderRow::as_select())
            .load(&mut conn)?;
        let item_rows = LineItemRow::belonging_to(&order_rows)
            .order(order_line_items::created_at.asc())
            .select(LineItemRow::as_select())
            .load(&mut conn)?;

        item_rows
            .grouped_by(&order_rows)
            .into_iter()
            .zip(order_rows)
            .map(|(items, order)| {
                Ok(OrderBatch {
                    order: OrderRecord::try_from(order)?,
                    items: items.into_iter().map(LineItem::from).collect(),
                })
            })
            .collect()
    }

    fn catalog_prices(&self, event_ids: &[Uuid]) -> Result<HashMap<Uuid, BigDecimal>, DomainError> {
        if event_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.pool.get()?;
        Ok(catalog_prices::table
            .filter(catalog_prices::event_id.eq_any(event_ids))
            .select((catalog_prices::event_id, catalog_prices::unit_price))
            .load::<(Uuid, BigDecimal)>(&mut conn)?
            .into_iter()
            .collect())
    }

    fn apply_correction(
        &self,
        correction: &Correction,
        audit: &AuditEntry,
    ) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        conn.transaction::<_, DomainError, _>(|conn| {
            let target = correction.target_id;
            let updated = match correction.field {
                CorrectionField::UnitPrice => diesel::update(
                    order_line_items::table
                        .filter(order_line_items::id.eq(target))
                        .filter(order_line_items::unit_price.eq(&correction.old_value)),
                )
                .set(order_line_items::unit_price.eq(&correction.new_value))
                .execute(conn)?,
                CorrectionField::TotalPrice => diesel::update(
                    order_line_items::table
                        .filter(order_line_items::id.eq(target))
                        .filter(order_line_items::total_price.eq(&correction.old_value)),
                )
                .set(order_line_items::total_price.eq(&correction.new_value))
                .execute(conn)?,
                CorrectionField::OrderTotal => diesel::update(
                    orders::table
                        .filter(orders::id.eq(target))
                        .filter(orders::total_amount.eq(&correction.old_value)),
                )
                .set((
                    orders::total_amount.eq(&correction.new_value),
                    orders::updated_at.eq(diesel::dsl::now),
                ))
                .execute(conn)?,
            };
            if updated == 0 {
                return Err(DomainError::Conflict(format!(
                    "{} of {} changed since detection",
                    correction.field.as_str(),
                    target
                )));
            }
            insert_audit(conn, audit)
        })
    }
}

/// Resolves charges from the gateway reference recorded on the order by the
/// payment webhook. An order without one has no charge.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredChargeLookup;

impl PaymentGateway for StoredChargeLookup {
    fn find_charge(&self, order: &OrderRecord) -> Result<Option<String>, GatewayError> {
        Ok(order
            .gateway_charge_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::db::DbPool;
    use crate::domain::reconciliation::{CorrectionType, EntityType};
    use crate::infrastructure::models::AuditRow;
    use crate::infrastructure::pg_store::testing::setup_db;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).expect("valid decimal")
    }

    fn seed_order(pool: &DbPool, total: &str, created_at: DateTime<Utc>) -> Uuid {
        let mut conn = pool.get().expect("conn");
        let id = Uuid::new_v4();
        diesel::insert_into(orders::table)
            .values((
                orders::id.eq(id),
                orders::customer_id.eq(Uuid::new_v4()),
                orders::status.eq("pending"),
                orders::total_amount.eq(dec(total)),
                orders::created_at.eq(created_at),
            ))
            .execute(&mut conn)
            .expect("insert order");
        id
    }

    fn seed_item(pool: &DbPool, order_id: Uuid, unit: &str, ticket_id: Option<Uuid>) -> Uuid {
        let mut conn = pool.get().expect("conn");
        let id = Uuid::new_v4();
        diesel::insert_into(order_line_items::table)
            .values((
                order_line_items::id.eq(id),
                order_line_items::order_id.eq(order_id),
                order_line_items::ticket_id.eq(ticket_id),
                order_line_items::name.eq("Ingresso"),
                order_line_items::event_id.eq(Some(Uuid::new_v4())),
                order_line_items::quantity.eq(1),
                order_line_items::unit_price.eq(dec(unit)),
                order_line_items::total_price.eq(dec(unit)),
            ))
            .execute(&mut conn)
            .expect("insert item");
        id
    }

    fn seed_orphan_ticket(pool: &DbPool) -> Uuid {
        let mut conn = pool.get().expect("conn");
        let id = Uuid::new_v4();
        diesel::insert_into(tickets::table)
            .values((
                tickets::id.eq(id),
                tickets::event_id.eq(Uuid::new_v4()),
                tickets::qr_payload.eq("payload"),
                tickets::price.eq(dec("50.00")),
            ))
            .execute(&mut conn)
            .expect("insert ticket");
        id
    }

    fn audit_rows(pool: &DbPool) -> Vec<AuditRow> {
        let mut conn = pool.get().expect("conn");
        reconciliation_audit::table
            .select(AuditRow::as_select())
            .load(&mut conn)
            .expect("audit")
    }

    #[tokio::test]
    async fn lock_has_one_holder_until_expiry() {
        let (_container, pool) = setup_db().await;
        let store = PgStore::new(pool);
        let now = Utc::now();

        assert!(store
            .try_acquire("a", now, now + Duration::minutes(5))
            .expect("acquire"));
        assert!(!store
            .try_acquire("b", now + Duration::minutes(1), now + Duration::minutes(6))
            .expect("contended"));
        assert!(store
            .try_acquire("b", now + Duration::minutes(5), now + Duration::minutes(10))
            .expect("reclaim"));

        assert!(!store.release("a").expect("stale release"));
        assert_eq!(store.current().expect("current").map(|l| l.holder), Some("b".to_string()));
        assert!(store.release("b").expect("release"));
        assert!(store.current().expect("current").is_none());
    }

    #[tokio::test]
    async fn link_orphan_ticket_writes_audit_and_refuses_relink() {
        let (_container, pool) = setup_db().await;
        let store = PgStore::new(pool.clone());
        let order_id = seed_order(&pool, "50.00", Utc::now());
        let ticket_id = seed_orphan_ticket(&pool);
        seed_item(&pool, order_id, "50.00", Some(ticket_id));

        let orphans = store
            .orphan_tickets_created_since(Utc::now() - Duration::hours(1))
            .expect("orphans");
        assert_eq!(orphans.len(), 1);
        assert_eq!(
            store
                .line_items_referencing_ticket(ticket_id)
                .expect("items")
                .len(),
            1
        );

        let audit = AuditEntry::new(
            Uuid::new_v4(),
            EntityType::Ticket,
            ticket_id,
            CorrectionType::OrphanTicketLinked,
            json!({ "order_id": null }),
            json!({ "order_id": order_id }),
            Utc::now(),
        );
        store
            .link_orphan_ticket(ticket_id, order_id, &audit)
            .expect("link");
        let again = store.link_orphan_ticket(ticket_id, order_id, &audit);

        assert!(matches!(again, Err(DomainError::Conflict(_))));
        assert_eq!(audit_rows(&pool).len(), 1);
        assert!(store
            .orphan_tickets_created_since(Utc::now() - Duration::hours(1))
            .expect("orphans")
            .is_empty());
    }

    #[tokio::test]
    async fn batches_group_items_under_their_order() {
        let (_container, pool) = setup_db().await;
        let store = PgStore::new(pool.clone());
        let first = seed_order(&pool, "10.00", Utc::now() - Duration::minutes(10));
        let second = seed_order(&pool, "20.00", Utc::now() - Duration::minutes(5));
        seed_item(&pool, first, "10.00", None);
        seed_item(&pool, second, "10.00", None);
        seed_item(&pool, second, "10.00", None);

        let batches = store
            .pending_order_batches_since(Utc::now() - Duration::hours(1))
            .expect("batches");

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].order.id, first);
        assert_eq!(batches[0].items.len(), 1);
        assert_eq!(batches[1].order.id, second);
        assert_eq!(batches[1].items.len(), 2);
    }

    #[tokio::test]
    async fn pending_orders_are_filtered_by_age_window() {
        let (_container, pool) = setup_db().await;
        let store = PgStore::new(pool.clone());
        let now = Utc::now();
        seed_order(&pool, "1.00", now - Duration::minutes(10));
        let old_enough = seed_order(&pool, "1.00", now - Duration::hours(3));
        seed_order(&pool, "1.00", now - Duration::days(9));

        let found = store
            .pending_orders_created_between(now - Duration::days(7), now - Duration::hours(1))
            .expect("orders");

        assert_eq!(found.iter().map(|o| o.id).collect::<Vec<_>>(), vec![old_enough]);
    }

    #[tokio::test]
    async fn correction_applies_only_over_the_detected_value() {
        let (_container, pool) = setup_db().await;
        let store = PgStore::new(pool.clone());
        let order_id = seed_order(&pool, "45.00", Utc::now());
        let item_id = seed_item(&pool, order_id, "45.00", None);
        let correction = Correction {
            target_id: item_id,
            order_id,
            field: CorrectionField::UnitPrice,
            old_value: dec("45.00"),
            new_value: dec("50.00"),
            reason: CorrectionType::PriceMismatch,
        };
        let audit = correction.audit_entry(Uuid::new_v4(), Utc::now());

        store
            .apply_correction(&correction, &audit)
            .expect("first apply");
        let stale = store.apply_correction(&correction, &correction.audit_entry(Uuid::new_v4(), Utc::now()));

        assert!(matches!(stale, Err(DomainError::Conflict(_))));
        let items = store
            .pending_order_batches_since(Utc::now() - Duration::hours(1))
            .expect("batches");
        assert_eq!(items[0].items[0].unit_price, dec("50.00"));
        assert_eq!(audit_rows(&pool).len(), 1);
    }

    #[tokio::test]
    async fn audit_rows_cannot_be_rewritten() {
        let (_container, pool) = setup_db().await;
        let store = PgStore::new(pool.clone());
        let order_id = seed_order(&pool, "45.00", Utc::now());
        let correction = Correction {
            target_id: order_id,
            order_id,
            field: CorrectionField::OrderTotal,
            old_value: dec("45.00"),
            new_value: dec("50.00"),
            reason: CorrectionType::OrderTotalMismatch,
        };
        store
            .apply_correction(&correction, &correction.audit_entry(Uuid::new_v4(), Utc::now()))
            .expect("apply");

        let mut conn = pool.get().expect("conn");
        let deleted = diesel::delete(reconciliation_audit::table).execute(&mut conn);

        assert!(deleted.is_err());
        assert_eq!(audit_rows(&pool).len(), 1);
    }

    #[tokio::test]
    async fn catalog_prices_returns_known_events_only() {
        let (_container, pool) = setup_db().await;
        let store = PgStore::new(pool.clone());
        let listed = Uuid::new_v4();
        {
            let mut conn = pool.get().expect("conn");
            diesel::insert_into(catalog_prices::table)
                .values((
                    catalog_prices::event_id.eq(listed),
                    catalog_prices::name.eq("Pista"),
                    catalog_prices::unit_price.eq(dec("50.00")),
                ))
                .execute(&mut conn)
                .expect("insert price");
        }

        let prices = store
            .catalog_prices(&[listed, Uuid::new_v4()])
            .expect("prices");

        assert_eq!(prices.len(), 1);
        assert_eq!(prices.get(&listed), Some(&dec("50.00")));
    }

    #[test]
    fn stored_charge_lookup_reads_the_recorded_reference() {
        let mut order = OrderRecord {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            status: OrderStatus::Pending,
            status_reason: None,
            total_amount: dec("10.00"),
            customer_email: None,
            gateway_charge_id: None,
            created_at: Utc::now(),
        };
        assert_eq!(StoredChargeLookup.find_charge(&order).expect("lookup"), None);

        order.gateway_charge_id = Some(" ".to_string());
        assert_eq!(StoredChargeLookup.find_charge(&order).expect("lookup"), None);

        order.gateway_charge_id = Some("pay_123".to_string());
        assert_eq!(
            StoredChargeLookup.find_charge(&order).expect("lookup"),
            Some("pay_123".to_string())
        );
    }
}
