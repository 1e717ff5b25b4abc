use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::{LineItem, OrderRecord, OrderStatus};
use crate::domain::ports::{IssuanceStore, IssuanceTx};
use crate::domain::reconciliation::AuditEntry;
use crate::domain::ticket::{NewTicket, TicketRecord};
use crate::schema::{order_line_items, orders, reconciliation_audit, seat_pool, tickets};

use super::models::{LineItemRow, NewAuditRow, NewTicketRow, OrderRow, TicketRow};
use super::pg_store::{PgStore, SEAT_POOL_ID};

/// Issuance operations bound to one open database transaction.
struct PgIssuanceTx<'a> {
    conn: &'a mut PgConnection,
}

fn load_tickets(conn: &mut PgConnection, order_id: Uuid) -> Result<Vec<TicketRecord>, DomainError> {
    tickets::table
        .filter(tickets::order_id.eq(order_id))
        .order(tickets::seat_number.asc())
        .select(TicketRow::as_select())
        .load(conn)?
        .into_iter()
        .map(TicketRecord::try_from)
        .collect()
}

impl IssuanceTx for PgIssuanceTx<'_> {
    fn lock_order(&mut self, order_id: Uuid) -> Result<Option<OrderRecord>, DomainError> {
        orders::table
            .filter(orders::id.eq(order_id))
            .select(OrderRow::as_select())
            .for_update()
            .first(self.conn)
            .optional()?
            .map(OrderRecord::try_from)
            .transpose()
    }

    fn tickets_for_order(&mut self, order_id: Uuid) -> Result<Vec<TicketRecord>, DomainError> {
        load_tickets(self.conn, order_id)
    }

    fn allocate_next_seat(&mut self) -> Result<i32, DomainError> {
        let seat = diesel::update(
            seat_pool::table
                .filter(seat_pool::id.eq(SEAT_POOL_ID))
                .filter(seat_pool::allocated.lt(seat_pool::capacity)),
        )
        .set(seat_pool::allocated.eq(seat_pool::allocated + 1))
        .returning(seat_pool::allocated)
        .get_result::<i32>(self.conn)
        .optional()?;

        match seat {
            Some(seat) => Ok(seat),
            None => {
                let capacity = seat_pool::table
                    .find(SEAT_POOL_ID)
                    .select(seat_pool::capacity)
                    .first::<i32>(self.conn)
                    .optional()?;
                match capacity {
                    Some(capacity) => Err(DomainError::CapacityExhausted { capacity }),
                    // A missing pool is a setup fault, not a sell-out.
                    None => Err(DomainError::Store(format!(
                        "seat pool '{SEAT_POOL_ID}' is not configured"
                    ))),
                }
            }
        }
    }

    fn insert_tickets(&mut self, new_tickets: &[NewTicket]) -> Result<(), DomainError> {
        let rows: Vec<NewTicketRow> = new_tickets.iter().map(NewTicketRow::from).collect();
        diesel::insert_into(tickets::table)
            .values(&rows)
            .execute(self.conn)?;
        Ok(())
    }

    fn set_order_status(
        &mut self,
        order_id: Uuid,
        status: OrderStatus,
        reason: Option<&str>,
    ) -> Result<(), DomainError> {
        let updated = diesel::update(orders::table.find(order_id))
            .set((
                orders::status.eq(status.as_str()),
                orders::status_reason.eq(reason),
                orders::updated_at.eq(diesel::dsl::now),
            ))
            .execute(self.conn)?;
        if updated == 0 {
            return Err(DomainError::NotFound(format!("order {order_id}")));
        }
        Ok(())
    }

    fn append_audit(&mut self, entries: &[AuditEntry]) -> Result<(), DomainError> {
        let rows: Vec<NewAuditRow> = entries.iter().map(NewAuditRow::from).collect();
        diesel::insert_into(reconciliation_audit::table)
            .values(&rows)
            .execute(self.conn)?;
        Ok(())
    }
}

impl IssuanceStore for PgStore {
    fn transaction<T, F>(&self, f: F) -> Result<T, DomainError>
    where
        F: FnOnce(&mut dyn IssuanceTx) -> Result<T, DomainError>,
    {
        let mut pooled = self.pool.get()?;
        let conn: &mut PgConnection = &mut pooled;
        conn.transaction::<_, DomainError, _>(|conn| f(&mut PgIssuanceTx { conn }))
    }

    fn line_items_for_order(&self, order_id: Uuid) -> Result<Vec<LineItem>, DomainError> {
        let mut conn = self.pool.get()?;
        Ok(order_line_items::table
            .filter(order_line_items::order_id.eq(order_id))
            .order(order_line_items::created_at.asc())
            .select(LineItemRow::as_select())
            .load(&mut conn)?
            .into_iter()
            .map(LineItem::from)
            .collect())
    }

    fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<TicketRecord>, DomainError> {
        let mut conn = self.pool.get()?;
        load_tickets(&mut conn, order_id)
    }
}
