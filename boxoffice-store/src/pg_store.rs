use async_trait::async_trait;
use boxoffice_core::{
    AuditEntry, CustomerDetails, Order, OrderItem, Seat, SeatLock, SeatStatus, Store, StoreError,
    StoreResult, StoreTx,
};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// PostgreSQL store. Check-then-write sequences rely on `SELECT … FOR UPDATE`
/// row locks taken inside the caller's transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(Box::new(err))
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct SeatRow {
    id: Uuid,
    event_id: Uuid,
    section: Option<String>,
    row_label: Option<String>,
    seat_number: String,
    seat_type: String,
    price: i64,
    status: String,
}

impl TryFrom<SeatRow> for Seat {
    type Error = StoreError;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        Ok(Seat {
            id: row.id,
            event_id: row.event_id,
            section: row.section,
            row: row.row_label,
            seat_number: row.seat_number,
            seat_type: row.seat_type,
            price: row.price,
            status: row.status.parse()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LockRow {
    id: Uuid,
    seat_id: Uuid,
    event_id: Uuid,
    session_id: String,
    ticket_type_id: Option<Uuid>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<LockRow> for SeatLock {
    fn from(row: LockRow) -> Self {
        SeatLock {
            id: row.id,
            seat_id: row.seat_id,
            event_id: row.event_id,
            session_id: row.session_id,
            ticket_type_id: row.ticket_type_id,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    event_id: Uuid,
    session_id: String,
    ticket_type_id: Option<Uuid>,
    customer_name: Option<String>,
    customer_email: Option<String>,
    customer_phone: Option<String>,
    total_amount: i64,
    status: String,
    expires_at: Option<DateTime<Utc>>,
    access_token_hash: String,
    paid_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let customer = match (row.customer_name, row.customer_email, row.customer_phone) {
            (Some(name), Some(email), Some(phone)) => Some(CustomerDetails::new(name, email, phone)),
            _ => None,
        };

        Ok(Order {
            id: row.id,
            order_number: row.order_number,
            event_id: row.event_id,
            session_id: row.session_id,
            ticket_type_id: row.ticket_type_id,
            customer,
            total_amount: row.total_amount,
            status: row.status.parse()?,
            expires_at: row.expires_at,
            access_token_hash: row.access_token_hash,
            paid_at: row.paid_at,
            cancelled_at: row.cancelled_at,
            cancellation_reason: row.cancellation_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    seat_id: Uuid,
    seat_number: String,
    seat_type: String,
    section: Option<String>,
    row_label: Option<String>,
    price: i64,
    created_at: DateTime<Utc>,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        OrderItem {
            id: row.id,
            order_id: row.order_id,
            seat_id: row.seat_id,
            seat_number: row.seat_number,
            seat_type: row.seat_type,
            section: row.section,
            row: row.row_label,
            price: row.price,
            created_at: row.created_at,
        }
    }
}

const SEAT_COLUMNS: &str =
    "id, event_id, section, row_label, seat_number, seat_type, price, status";
const LOCK_COLUMNS: &str =
    "id, seat_id, event_id, session_id, ticket_type_id, expires_at, created_at";
const ORDER_COLUMNS: &str = "id, order_number, event_id, session_id, ticket_type_id, \
     customer_name, customer_email, customer_phone, total_amount, status, expires_at, access_token_hash, paid_at, cancelled_at, \
     cancellation_reason, created_at, updated_at";

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await.map_err(backend)?;
        Ok(Box::new(PgTx { tx }))
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn seats_for_update(&mut self, event_id: Uuid, seat_ids: &[Uuid]) -> StoreResult<Vec<Seat>> {
        let sql = format!(
            "SELECT {SEAT_COLUMNS} FROM seats WHERE event_id = $1 AND id = ANY($2) ORDER BY id FOR UPDATE"
        );
        let rows: Vec<SeatRow> = sqlx::query_as(&sql)
            .bind(event_id)
            .bind(seat_ids)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(backend)?;

        rows.into_iter().map(Seat::try_from).collect()
    }

    async fn set_seat_status(
        &mut self,
        seat_ids: &[Uuid],
        status: SeatStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE seats SET status = $1, updated_at = $2 WHERE id = ANY($3)")
            .bind(status.as_str())
            .bind(now)
            .bind(seat_ids)
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn locks_for_seats(&mut self, seat_ids: &[Uuid]) -> StoreResult<Vec<SeatLock>> {
        let sql = format!(
            "SELECT {LOCK_COLUMNS} FROM seat_locks WHERE seat_id = ANY($1) ORDER BY seat_id FOR UPDATE"
        );
        let rows: Vec<LockRow> = sqlx::query_as(&sql)
            .bind(seat_ids)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(backend)?;
        Ok(rows.into_iter().map(SeatLock::from).collect())
    }

    async fn upsert_lock(&mut self, lock: &SeatLock) -> StoreResult<()> {
        // A row of another session is only ever overwritten after the caller
        // has seen it expire under the seat's row lock.
        sqlx::query(
            r#"
            INSERT INTO seat_locks (id, seat_id, event_id, session_id, ticket_type_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (seat_id) DO UPDATE SET
                created_at = CASE WHEN seat_locks.session_id = EXCLUDED.session_id
                                  THEN seat_locks.created_at ELSE EXCLUDED.created_at END,
                event_id = EXCLUDED.event_id,
                session_id = EXCLUDED.session_id,
                ticket_type_id = EXCLUDED.ticket_type_id,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(lock.id)
        .bind(lock.seat_id)
        .bind(lock.event_id)
        .bind(&lock.session_id)
        .bind(lock.ticket_type_id)
        .bind(lock.expires_at)
        .bind(lock.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn session_locks(
        &mut self,
        event_id: Uuid,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<SeatLock>> {
        let sql = format!(
            "SELECT {LOCK_COLUMNS} FROM seat_locks \
             WHERE event_id = $1 AND session_id = $2 AND expires_at > $3 \
             ORDER BY expires_at, seat_id"
        );
        let rows: Vec<LockRow> = sqlx::query_as(&sql)
            .bind(event_id)
            .bind(session_id)
            .bind(now)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(backend)?;
        Ok(rows.into_iter().map(SeatLock::from).collect())
    }

    async fn delete_session_locks(
        &mut self,
        event_id: Uuid,
        session_id: &str,
        seat_ids: Option<&[Uuid]>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM seat_locks \
             WHERE event_id = $1 AND session_id = $2 AND ($3::uuid[] IS NULL OR seat_id = ANY($3))",
        )
        .bind(event_id)
        .bind(session_id)
        .bind(seat_ids.map(<[Uuid]>::to_vec))
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn extend_session_locks(
        &mut self,
        event_id: Uuid,
        session_id: &str,
        seat_ids: Option<&[Uuid]>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE seat_locks SET expires_at = $4 \
             WHERE event_id = $1 AND session_id = $2 AND expires_at > $3 \
             AND ($5::uuid[] IS NULL OR seat_id = ANY($5))",
        )
        .bind(event_id)
        .bind(session_id)
        .bind(now)
        .bind(expires_at)
        .bind(seat_ids.map(<[Uuid]>::to_vec))
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn set_lock_expiry(
        &mut self,
        event_id: Uuid,
        session_id: &str,
        seat_ids: &[Uuid],
        expires_at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE seat_locks SET expires_at = $4 \
             WHERE event_id = $1 AND session_id = $2 AND seat_id = ANY($3)",
        )
        .bind(event_id)
        .bind(session_id)
        .bind(seat_ids)
        .bind(expires_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn delete_lapsed_locks(
        &mut self,
        event_id: Uuid,
        seat_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM seat_locks WHERE event_id = $1 AND seat_id = ANY($2) AND expires_at <= $3",
        )
        .bind(event_id)
        .bind(seat_ids)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_locks(&mut self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM seat_locks WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn event_seats_with_locks(
        &mut self,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<(Seat, Option<SeatLock>)>> {
        #[derive(sqlx::FromRow)]
        struct SeatMapRow {
            #[sqlx(flatten)]
            seat: SeatRow,
            lock_id: Option<Uuid>,
            lock_session_id: Option<String>,
            lock_ticket_type_id: Option<Uuid>,
            lock_expires_at: Option<DateTime<Utc>>,
            lock_created_at: Option<DateTime<Utc>>,
        }

        let rows: Vec<SeatMapRow> = sqlx::query_as(
            r#"
            SELECT s.id, s.event_id, s.section, s.row_label, s.seat_number, s.seat_type, s.price, s.status,
                   l.id AS lock_id, l.session_id AS lock_session_id, l.ticket_type_id AS lock_ticket_type_id,
                   l.expires_at AS lock_expires_at, l.created_at AS lock_created_at
            FROM seats s
            LEFT JOIN seat_locks l ON l.seat_id = s.id AND l.expires_at > $2
            WHERE s.event_id = $1
            ORDER BY s.section, s.row_label, s.seat_number
            "#,
        )
        .bind(event_id)
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                let lock = match (row.lock_id, row.lock_session_id, row.lock_expires_at, row.lock_created_at) {
                    (Some(id), Some(session_id), Some(expires_at), Some(created_at)) => Some(SeatLock {
                        id,
                        seat_id: row.seat.id,
                        event_id: row.seat.event_id,
                        session_id,
                        ticket_type_id: row.lock_ticket_type_id,
                        expires_at,
                        created_at,
                    }),
                    _ => None,
                };
                Ok((Seat::try_from(row.seat)?, lock))
            })
            .collect()
    }

    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> StoreResult<()> {
        let customer = order.customer.as_ref();

        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, event_id, session_id, ticket_type_id,
                                customer_name, customer_email, customer_phone,
                                total_amount, status, expires_at, access_token_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.event_id)
        .bind(&order.session_id)
        .bind(order.ticket_type_id)
        .bind(customer.map(|c| c.name.clone()))
        .bind(customer.map(|c| c.email.expose().clone()))
        .bind(customer.map(|c| c.phone.expose().clone()))
        .bind(order.total_amount)
        .bind(order.status.as_str())
        .bind(order.expires_at)
        .bind(&order.access_token_hash)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, seat_id, seat_number, seat_type, section, row_label, price, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(item.id)
            .bind(item.order_id)
            .bind(item.seat_id)
            .bind(&item.seat_number)
            .bind(&item.seat_type)
            .bind(&item.section)
            .bind(&item.row)
            .bind(item.price)
            .bind(item.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;
        }

        Ok(())
    }

    async fn order_for_update(&mut self, order_id: Uuid) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?;
        row.map(Order::try_from).transpose()
    }

    async fn order_by_id(&mut self, order_id: Uuid) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?;
        row.map(Order::try_from).transpose()
    }

    async fn order_by_number(&mut self, order_number: &str) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1");
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(order_number)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?;
        row.map(Order::try_from).transpose()
    }

    async fn order_items(&mut self, order_id: Uuid) -> StoreResult<Vec<OrderItem>> {
        let rows: Vec<OrderItemRow> = sqlx::query_as(
            "SELECT id, order_id, seat_id, seat_number, seat_type, section, row_label, price, created_at \
             FROM order_items WHERE order_id = $1 ORDER BY seat_id",
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(OrderItem::from).collect())
    }

    async fn active_orders_for_seats(
        &mut self,
        seat_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<(Uuid, Uuid)>> {
        sqlx::query_as(
            r#"
            SELECT oi.seat_id, oi.order_id
            FROM order_items oi
            JOIN orders o ON o.id = oi.order_id
            WHERE oi.seat_id = ANY($1)
              AND (o.status = 'PENDING_CONFIRMATION'
                   OR (o.status = 'PENDING' AND o.expires_at > $2))
            ORDER BY oi.seat_id
            "#,
        )
        .bind(seat_ids)
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(backend)
    }

    async fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        let customer = order.customer.as_ref();

        sqlx::query(
            r#"
            UPDATE orders SET
                customer_name = $2,
                customer_email = $3,
                customer_phone = $4,
                status = $5,
                expires_at = $6,
                access_token_hash = $7,
                paid_at = $8,
                cancelled_at = $9,
                cancellation_reason = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(customer.map(|c| c.name.clone()))
        .bind(customer.map(|c| c.email.expose().clone()))
        .bind(customer.map(|c| c.phone.expose().clone()))
        .bind(order.status.as_str())
        .bind(order.expires_at)
        .bind(&order.access_token_hash)
        .bind(order.paid_at)
        .bind(order.cancelled_at)
        .bind(&order.cancellation_reason)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn stale_pending_orders(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        sqlx::query_scalar(
            "SELECT id FROM orders WHERE status = 'PENDING' AND expires_at <= $1 ORDER BY expires_at",
        )
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(backend)
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, actor_id, action, entity, entity_id, old_status, new_status, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.actor_id)
        .bind(entry.action.as_str())
        .bind(&entry.entity)
        .bind(entry.entity_id)
        .bind(entry.old_status.as_str())
        .bind(entry.new_status.as_str())
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::CommitFailed(e.to_string()))
    }
}
