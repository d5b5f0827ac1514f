//! Postgres-backed order service
//!
//! The settlement service shares the storefront's database; this adapter
//! exposes the payment-related slice of the `orders` table through the
//! [`OrderService`] contract.

use crate::orders::{Order, OrderService, OrderServiceError, OrderState, PaymentApplication};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tracing::info;

#[derive(Debug, FromRow)]
struct OrderRow {
    id: String,
    code: String,
    state: String,
    total_with_tax: i64,
    currency: String,
    customer_email: Option<String>,
}

impl OrderRow {
    fn into_order(self) -> Result<Order, OrderServiceError> {
        let state = order_state_from_db(&self.state)?;
        Ok(Order {
            id: self.id,
            code: self.code,
            state,
            total_with_tax: self.total_with_tax,
            currency: self.currency,
            customer_email: self.customer_email,
        })
    }
}

fn order_state_from_db(raw: &str) -> Result<OrderState, OrderServiceError> {
    match raw {
        "arranging_payment" => Ok(OrderState::ArrangingPayment),
        "payment_hold" => Ok(OrderState::PaymentHold),
        "declined" => Ok(OrderState::Declined),
        "payment_settled" => Ok(OrderState::PaymentSettled),
        "completed" => Ok(OrderState::Completed),
        "canceled" => Ok(OrderState::Canceled),
        other => Err(OrderServiceError::DomainFailure {
            message: format!("order is in unrecognized state '{}'", other),
        }),
    }
}

const ORDER_COLUMNS: &str = "id, code, state, total_with_tax, currency, customer_email";

pub struct PgOrderService {
    pool: PgPool,
}

impl PgOrderService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(&self, order_id: &str) -> Result<Order, OrderServiceError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_unavailable)?
            .ok_or_else(|| OrderServiceError::NotFound {
                code: order_id.to_string(),
            })?;
        row.into_order()
    }
}

fn db_unavailable(err: sqlx::Error) -> OrderServiceError {
    OrderServiceError::Unavailable {
        message: err.to_string(),
    }
}

#[async_trait]
impl OrderService for PgOrderService {
    async fn find_order_by_code(&self, code: &str) -> Result<Option<Order>, OrderServiceError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE code = $1");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_unavailable)?;
        row.map(OrderRow::into_order).transpose()
    }

    async fn apply_payment(
        &self,
        order_id: &str,
        application: PaymentApplication,
    ) -> Result<Order, OrderServiceError> {
        // The payment only applies to orders still waiting on one.
        let sql = format!(
            "UPDATE orders \
             SET state = 'payment_settled', payment_intent_id = $2, \
                 paid_amount = $3, paid_currency = $4, paid_at = NOW() \
             WHERE id = $1 AND state IN ('arranging_payment', 'payment_hold') \
             RETURNING {ORDER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .bind(&application.intent_id)
            .bind(application.amount)
            .bind(&application.currency)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_unavailable)?;

        match row {
            Some(row) => {
                info!(
                    order_id,
                    intent_id = %application.intent_id,
                    "payment applied to order"
                );
                row.into_order()
            }
            None => {
                // Either missing or not in a payable state; report which.
                let current = self.load(order_id).await?;
                Err(OrderServiceError::DomainFailure {
                    message: format!(
                        "order {} is in state '{}' and cannot accept a payment",
                        current.code, current.state
                    ),
                })
            }
        }
    }

    async fn next_states(&self, order_id: &str) -> Result<Vec<OrderState>, OrderServiceError> {
        let order = self.load(order_id).await?;
        Ok(order.state.valid_transitions())
    }

    async fn transition_to(
        &self,
        order_id: &str,
        state: OrderState,
    ) -> Result<Order, OrderServiceError> {
        let current = self.load(order_id).await?;
        if !current.state.can_transition_to(state) {
            return Err(OrderServiceError::InvalidTransition {
                from: current.state,
                to: state,
            });
        }

        let sql = format!(
            "UPDATE orders SET state = $2 WHERE id = $1 AND state = $3 RETURNING {ORDER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .bind(state.as_str())
            .bind(current.state.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_unavailable)?;

        match row {
            Some(row) => row.into_order(),
            // Lost a race with another writer; surface the fresh state
            None => {
                let fresh = self.load(order_id).await?;
                Err(OrderServiceError::InvalidTransition {
                    from: fresh.state,
                    to: state,
                })
            }
        }
    }
}
