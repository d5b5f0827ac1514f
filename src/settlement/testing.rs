//! In-memory implementations of the settlement seams
//!
//! Used by unit and integration tests in place of Postgres, Stripe, and the
//! order service. Not wired into the production binary.

use crate::database::error::DatabaseError;
use crate::database::pending_payment_repository::PendingPayment;
use crate::orders::{Order, OrderService, OrderServiceError, OrderState, PaymentApplication};
use crate::processor::client::PaymentProcessor;
use crate::processor::error::{ProcessorError, ProcessorResult};
use crate::processor::types::{IntentStatus, PaymentIntent};
use crate::settlement::store::{
    FailureRecord, PaymentPage, PaymentSearchFilter, PaymentStatistics, PaymentStatus,
    PendingBacklog, PendingPaymentStore,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// In-memory pending-payment ledger
#[derive(Default)]
pub struct MockStore {
    rows: Mutex<HashMap<String, PendingPayment>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payment(intent_id: &str, order_code: &str, amount: i64) -> Self {
        let store = Self::new();
        store.insert_pending(intent_id, order_code, amount);
        store
    }

    pub fn insert_pending(&self, intent_id: &str, order_code: &str, amount: i64) {
        let payment = PendingPayment {
            id: Uuid::new_v4(),
            intent_id: intent_id.to_string(),
            order_id: "order-1".to_string(),
            order_code: order_code.to_string(),
            amount,
            currency: "usd".to_string(),
            customer_email: Some("customer@example.com".to_string()),
            status: "pending".to_string(),
            failure_reason: None,
            failure_type: None,
            is_retryable: None,
            retry_count: 0,
            manual_settlement: false,
            settled_by: None,
            canceled_by: None,
            created_at: Utc::now(),
            claimed_at: None,
            settled_at: None,
            failed_at: None,
        };
        self.rows
            .lock()
            .unwrap()
            .insert(intent_id.to_string(), payment);
    }

    pub fn get(&self, intent_id: &str) -> Option<PendingPayment> {
        self.rows.lock().unwrap().get(intent_id).cloned()
    }

    pub fn set_status(&self, intent_id: &str, status: PaymentStatus) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(intent_id) {
            row.status = status.to_db_status().to_string();
            if status == PaymentStatus::Settling {
                row.claimed_at = Some(Utc::now());
            }
            if status == PaymentStatus::Failed {
                row.failure_reason = Some("previous failure".to_string());
                row.failure_type = Some("system_error".to_string());
                row.is_retryable = Some(true);
                row.failed_at = Some(Utc::now());
            }
            if status == PaymentStatus::Settled {
                row.settled_at = Some(Utc::now());
            }
        }
    }

    /// Age a settling claim, as if the process that took it had died
    pub fn backdate_claim(&self, intent_id: &str, secs: i64) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(intent_id) {
            row.claimed_at = Some(Utc::now() - chrono::Duration::seconds(secs));
        }
    }
}

#[async_trait]
impl PendingPaymentStore for MockStore {
    async fn find_by_intent_id(
        &self,
        intent_id: &str,
    ) -> Result<Option<PendingPayment>, DatabaseError> {
        Ok(self.get(intent_id))
    }

    async fn claim_for_settlement(&self, intent_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(intent_id) {
            Some(row) if row.status == "pending" => {
                row.status = "settling".to_string();
                row.claimed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_claim(&self, intent_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(intent_id) {
            Some(row) if row.status == "settling" => {
                row.status = "pending".to_string();
                row.claimed_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_stale_claims(&self, older_than_secs: i64) -> Result<u64, DatabaseError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(older_than_secs);
        let mut rows = self.rows.lock().unwrap();
        let mut released = 0;
        for row in rows.values_mut() {
            if row.status == "settling" && row.claimed_at.unwrap_or(row.created_at) < cutoff {
                row.status = "pending".to_string();
                row.claimed_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn mark_settled(
        &self,
        intent_id: &str,
        settled_by: Option<&str>,
        manual: bool,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(intent_id) {
            Some(row) if row.status == "settling" => {
                row.status = "settled".to_string();
                row.settled_at = Some(Utc::now());
                row.settled_by = settled_by.map(String::from);
                row.manual_settlement = manual;
                row.claimed_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(
        &self,
        intent_id: &str,
        failure: &FailureRecord,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(intent_id) {
            Some(row) if row.status == "pending" || row.status == "settling" => {
                row.status = "failed".to_string();
                row.failure_reason = Some(failure.reason.clone());
                row.failure_type = Some(failure.failure_type.as_str().to_string());
                row.is_retryable = Some(failure.is_retryable);
                row.failed_at = Some(Utc::now());
                row.claimed_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_canceled(
        &self,
        intent_id: &str,
        reason: &str,
        canceled_by: &str,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(intent_id) {
            Some(row) if row.status != "settled" => {
                row.status = "failed".to_string();
                row.failure_reason = Some(reason.to_string());
                row.failure_type = Some("user_error".to_string());
                row.is_retryable = Some(false);
                row.failed_at = Some(Utc::now());
                row.canceled_by = Some(canceled_by.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_for_retry(
        &self,
        intent_id: &str,
    ) -> Result<Option<PendingPayment>, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(intent_id) {
            Some(row) if row.status == "failed" => {
                row.status = "pending".to_string();
                row.failure_reason = None;
                row.failure_type = None;
                row.is_retryable = None;
                row.failed_at = None;
                row.claimed_at = None;
                row.retry_count += 1;
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn search(&self, filter: &PaymentSearchFilter) -> Result<PaymentPage, DatabaseError> {
        let rows = self.rows.lock().unwrap();
        let mut items: Vec<_> = rows
            .values()
            .filter(|row| {
                filter
                    .status
                    .map(|s| row.status == s.to_db_status())
                    .unwrap_or(true)
                    && filter
                        .order_code
                        .as_ref()
                        .map(|c| row.order_code.contains(c.as_str()))
                        .unwrap_or(true)
                    && filter.created_after.map(|t| row.created_at >= t).unwrap_or(true)
                    && filter.created_before.map(|t| row.created_at <= t).unwrap_or(true)
                    && filter
                        .is_retryable
                        .map(|r| row.is_retryable == Some(r))
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = items.len() as i64;
        let items = items
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect();
        Ok(PaymentPage { items, total })
    }

    async fn statistics(&self) -> Result<PaymentStatistics, DatabaseError> {
        let rows = self.rows.lock().unwrap();
        let total = rows.len() as i64;
        let count = |status: &str| rows.values().filter(|r| r.status == status).count() as i64;
        let pending = count("pending") + count("settling");
        let average_amount = if total > 0 {
            Some(rows.values().map(|r| r.amount).sum::<i64>() as f64 / total as f64)
        } else {
            None
        };
        Ok(PaymentStatistics {
            total,
            pending,
            settled: count("settled"),
            failed: count("failed"),
            retryable_failed: rows
                .values()
                .filter(|r| r.status == "failed" && r.is_retryable == Some(true))
                .count() as i64,
            average_amount,
        })
    }

    async fn backlog(&self) -> Result<PendingBacklog, DatabaseError> {
        let rows = self.rows.lock().unwrap();
        let pending: Vec<_> = rows
            .values()
            .filter(|r| r.status == "pending" || r.status == "settling")
            .collect();
        Ok(PendingBacklog {
            pending_count: pending.len() as i64,
            oldest_pending_at: pending.iter().map(|r| r.created_at).min(),
        })
    }

    async fn cleanup_old_failed(&self, older_than_days: i64) -> Result<u64, DatabaseError> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, row| {
            !(row.status == "failed"
                && row.is_retryable != Some(true)
                && row.failed_at.map(|t| t < cutoff).unwrap_or(false))
        });
        Ok((before - rows.len()) as u64)
    }
}

/// In-memory order service with a call counter on `apply_payment`
#[derive(Default)]
pub struct MockOrderService {
    orders: Mutex<HashMap<String, Order>>,
    apply_calls: AtomicU32,
    reject_apply: Mutex<Option<OrderServiceError>>,
    reject_find: Mutex<Option<OrderServiceError>>,
}

impl MockOrderService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(order: Order) -> Self {
        let service = Self::new();
        service
            .orders
            .lock()
            .unwrap()
            .insert(order.id.clone(), order);
        service
    }

    /// Make the next `apply_payment` calls fail with the given error
    pub fn reject_apply_with(&self, err: OrderServiceError) {
        *self.reject_apply.lock().unwrap() = Some(err);
    }

    /// Make order lookups fail with the given error
    pub fn reject_find_with(&self, err: OrderServiceError) {
        *self.reject_find.lock().unwrap() = Some(err);
    }

    pub fn apply_calls(&self) -> u32 {
        self.apply_calls.load(Ordering::SeqCst)
    }

    pub fn current_state(&self, order_id: &str) -> Option<OrderState> {
        self.orders.lock().unwrap().get(order_id).map(|o| o.state)
    }
}

#[async_trait]
impl OrderService for MockOrderService {
    async fn find_order_by_code(&self, code: &str) -> Result<Option<Order>, OrderServiceError> {
        if let Some(err) = self.reject_find.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|o| o.code == code)
            .cloned())
    }

    async fn apply_payment(
        &self,
        order_id: &str,
        _application: PaymentApplication,
    ) -> Result<Order, OrderServiceError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.reject_apply.lock().unwrap().clone() {
            return Err(err);
        }
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| OrderServiceError::NotFound {
                code: order_id.to_string(),
            })?;
        order.state = OrderState::PaymentSettled;
        Ok(order.clone())
    }

    async fn next_states(&self, order_id: &str) -> Result<Vec<OrderState>, OrderServiceError> {
        let orders = self.orders.lock().unwrap();
        let order = orders
            .get(order_id)
            .ok_or_else(|| OrderServiceError::NotFound {
                code: order_id.to_string(),
            })?;
        Ok(order.state.valid_transitions())
    }

    async fn transition_to(
        &self,
        order_id: &str,
        state: OrderState,
    ) -> Result<Order, OrderServiceError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| OrderServiceError::NotFound {
                code: order_id.to_string(),
            })?;
        if !order.state.can_transition_to(state) {
            return Err(OrderServiceError::InvalidTransition {
                from: order.state,
                to: state,
            });
        }
        order.state = state;
        Ok(order.clone())
    }
}

/// Scriptable payment processor with a call counter
#[derive(Default)]
pub struct MockProcessor {
    responses: Mutex<VecDeque<ProcessorResult<PaymentIntent>>>,
    fallback: Mutex<Option<PaymentIntent>>,
    calls: AtomicU32,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer with this intent once scripted responses run out
    pub fn with_intent(intent: PaymentIntent) -> Self {
        let processor = Self::new();
        *processor.fallback.lock().unwrap() = Some(intent);
        processor
    }

    /// Answer with the scripted results in order
    pub fn with_responses(responses: Vec<ProcessorResult<PaymentIntent>>) -> Self {
        let processor = Self::new();
        *processor.responses.lock().unwrap() = responses.into();
        processor
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProcessor for MockProcessor {
    async fn retrieve_intent(&self, intent_id: &str) -> ProcessorResult<PaymentIntent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.responses.lock().unwrap().pop_front() {
            return scripted;
        }
        if let Some(intent) = self.fallback.lock().unwrap().clone() {
            return Ok(intent);
        }
        Err(ProcessorError::Connection {
            message: format!("no scripted response for {}", intent_id),
        })
    }
}

/// Succeeded intent carrying an order-code metadata stamp
pub fn succeeded_intent(id: &str, order_code: &str, amount: i64) -> PaymentIntent {
    let mut metadata = HashMap::new();
    metadata.insert(
        crate::processor::types::ORDER_CODE_METADATA_KEY.to_string(),
        order_code.to_string(),
    );
    PaymentIntent {
        id: id.to_string(),
        status: IntentStatus::Succeeded,
        amount,
        currency: "usd".to_string(),
        metadata,
        latest_charge: Some("ch_test".to_string()),
    }
}
