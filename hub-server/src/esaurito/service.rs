//! Out-of-stock order state machine
//!
//! ```text
//! flag ──▶ ATTIVO ──claim──▶ IN_GESTIONE ──split──▶ RISOLTO
//!             │                   │
//!             └───────cancel──────┴──cancel──▶ ANNULLATO
//! ```
//!
//! Transitions are serialized by one service lock: one claimant at a time,
//! and a terminal record never mutates again. Both terminal transitions are
//! idempotent against an already-terminal record because the triggering
//! events arrive at-least-once.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use shared::error::{AppError, AppResult, ErrorCode};
use shared::esaurito::{
    AffectedItem, EsauritoCancelledPayload, EsauritoResolvedPayload, OutOfStockOrder,
    OutOfStockState,
};
use shared::event::{EntityChange, EntityOperation, EventPriority, kinds};
use shared::order::{Order, OrderState, append_management_note, clean_management_note};

use crate::esaurito::store::{InventoryStore, OrderStore};
use crate::hub::{EmitOptions, EventHub};

pub struct EsauritoService {
    // original order id → record; the service lock serializes transitions
    records: Mutex<HashMap<String, OutOfStockOrder>>,
    orders: Arc<dyn OrderStore>,
    inventory: Arc<dyn InventoryStore>,
    hub: EventHub,
}

impl EsauritoService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        inventory: Arc<dyn InventoryStore>,
        hub: EventHub,
    ) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            orders,
            inventory,
            hub,
        }
    }

    /// Current record for an order, if any
    pub async fn get(&self, order_id: &str) -> Option<OutOfStockOrder> {
        self.records.lock().await.get(order_id).cloned()
    }

    // ==================== Flag ====================

    /// Open an out-of-stock record for an order whose products went
    /// unavailable mid-fulfillment
    ///
    /// Captures the reserved quantities NOW; cancel restores exactly these,
    /// never a recomputation. Re-flagging an order with an open record
    /// returns the existing record unchanged.
    pub async fn flag(
        &self,
        order_id: &str,
        unavailable_products: &[String],
    ) -> AppResult<OutOfStockOrder> {
        let mut records = self.records.lock().await;

        if let Some(existing) = records.get(order_id)
            && !existing.state.is_terminal()
        {
            return Ok(existing.clone());
        }

        let mut order = self.orders.get(order_id).await?;
        if order.state == OrderState::Annullato {
            return Err(
                AppError::new(ErrorCode::OrderAlreadyVoided).with_detail("order_id", order_id)
            );
        }

        let affected: Vec<AffectedItem> = order
            .lines
            .iter()
            .filter(|l| {
                l.state == OrderState::Attivo && unavailable_products.contains(&l.product_id)
            })
            .map(|l| AffectedItem {
                product_id: l.product_id.clone(),
                name: l.name.clone(),
                quantity_reserved: l.quantity,
            })
            .collect();

        if affected.is_empty() {
            return Err(AppError::validation("No order line carries the flagged products")
                .with_detail("order_id", order_id));
        }

        for line in &mut order.lines {
            if unavailable_products.contains(&line.product_id) {
                line.available = false;
            }
        }
        let names: Vec<&str> = affected.iter().map(|i| i.name.as_str()).collect();
        order.note = Some(append_management_note(
            order.note.as_deref(),
            &format!("prodotti esauriti: {}", names.join(", ")),
        ));
        self.orders.update(order.clone()).await?;

        let record = OutOfStockOrder::new(
            order.id.clone(),
            order.order_number.clone(),
            order.table_number.clone(),
            affected,
        );
        records.insert(order_id.to_string(), record.clone());

        let _ = self.hub.emit(
            kinds::ORDER_ESAURITO_CREATED,
            serde_json::to_value(&record)?,
            EmitOptions {
                priority: EventPriority::High,
                acknowledgment_required: true,
                ..Default::default()
            },
        )?;

        tracing::info!(order_id = %order_id, "Out-of-stock record opened");
        Ok(record)
    }

    // ==================== Claim ====================

    /// Take ownership of a record
    ///
    /// One claimant at a time. Re-claim by the same operator is a no-op
    /// success; claim by anyone else while the record is open is a
    /// conflict, and so is a claim on a terminal record.
    pub async fn claim(&self, order_id: &str, operator: &str) -> AppResult<OutOfStockOrder> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(order_id)
            .ok_or_else(|| AppError::new(ErrorCode::EsauritoNotFound).with_detail("order_id", order_id))?;

        if record.state.is_terminal() {
            return Err(AppError::new(ErrorCode::RecordTerminal).with_detail("order_id", order_id));
        }

        match record.handled_by.clone() {
            Some(holder) if holder == operator => Ok(record.clone()),
            Some(holder) => Err(AppError::claim_conflict(holder)),
            None => {
                record.state = OutOfStockState::InGestione;
                record.handled_by = Some(operator.to_string());
                record.updated_at = chrono::Utc::now().timestamp_millis();
                tracing::info!(order_id = %order_id, operator = %operator, "Out-of-stock record claimed");
                Ok(record.clone())
            }
        }
    }

    // ==================== Resolve by split ====================

    /// Replace the order with a new one carrying only the still-fulfillable
    /// lines; the original is voided
    ///
    /// Retrying against a record already RISOLTO succeeds with no side
    /// effect. A record already ANNULLATO cannot be split.
    pub async fn resolve_split(&self, order_id: &str, operator: &str) -> AppResult<OutOfStockOrder> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(order_id)
            .ok_or_else(|| AppError::new(ErrorCode::EsauritoNotFound).with_detail("order_id", order_id))?;

        match record.state {
            OutOfStockState::Risolto => return Ok(record.clone()),
            OutOfStockState::Annullato => {
                return Err(
                    AppError::new(ErrorCode::RecordTerminal).with_detail("order_id", order_id)
                );
            }
            _ => {}
        }

        let mut original = self.orders.get(order_id).await?;
        let fulfillable: Vec<_> = original.fulfillable_lines().cloned().collect();
        if fulfillable.is_empty() {
            return Err(AppError::validation(
                "No fulfillable lines remain; cancel the order instead",
            )
            .with_detail("order_id", order_id));
        }

        // The new order starts from a note cleaned of every management
        // annotation, so repeated splits never compound them.
        let new_order = Order {
            id: Uuid::new_v4().to_string(),
            order_number: self.orders.next_order_number().await?,
            table_number: original.table_number.clone(),
            lines: fulfillable,
            state: OrderState::Attivo,
            note: clean_management_note(original.note.as_deref()),
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        self.orders.insert(new_order.clone()).await?;

        original.note = Some(append_management_note(
            original.note.as_deref(),
            &format!("risolto con nuovo ordine #{}", new_order.order_number),
        ));
        original.void();
        self.orders.update(original.clone()).await?;

        let now = chrono::Utc::now().timestamp_millis();
        record.state = OutOfStockState::Risolto;
        record.resolved_by = Some(operator.to_string());
        record.split_order_id = Some(new_order.id.clone());
        record.updated_at = now;

        let payload = EsauritoResolvedPayload {
            original_order_id: original.id.clone(),
            original_order_number: original.order_number.clone(),
            new_order_id: new_order.id.clone(),
            new_order_number: new_order.order_number.clone(),
            table_number: record.table_number.clone(),
            resolved_by: operator.to_string(),
            timestamp: now,
        };
        let _ = self.hub.emit(
            kinds::ORDER_ESAURITO_RESOLVED,
            serde_json::to_value(&payload)?,
            EmitOptions {
                priority: EventPriority::High,
                acknowledgment_required: true,
                entity_changes: Some(vec![
                    EntityChange {
                        entity_type: "order".into(),
                        entity_id: original.id.clone(),
                        operation: EntityOperation::Update,
                        version: now as u64,
                        previous_version: None,
                    },
                    EntityChange {
                        entity_type: "order".into(),
                        entity_id: new_order.id.clone(),
                        operation: EntityOperation::Create,
                        version: now as u64,
                        previous_version: None,
                    },
                ]),
                ..Default::default()
            },
        )?;

        crate::audit_log!(
            operator,
            "esaurito_resolve_split",
            format!("order:{}", order_id),
            format!("new order #{}", new_order.order_number)
        );
        tracing::info!(
            order_id = %order_id,
            new_order_id = %new_order.id,
            operator = %operator,
            "Out-of-stock record resolved by split"
        );
        Ok(record.clone())
    }

    // ==================== Resolve by cancel ====================

    /// Void the order and restore the reserved inventory
    ///
    /// Inventory restoration uses the quantities frozen at flag time and is
    /// best-effort: a restore failure is logged for reconciliation, the
    /// state transition proceeds regardless. Retrying against a record
    /// already ANNULLATO succeeds with no side effect, so inventory is
    /// restored exactly once however many times the cancel is delivered.
    pub async fn resolve_cancel(&self, order_id: &str, operator: &str) -> AppResult<OutOfStockOrder> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(order_id)
            .ok_or_else(|| AppError::new(ErrorCode::EsauritoNotFound).with_detail("order_id", order_id))?;

        match record.state {
            OutOfStockState::Annullato => return Ok(record.clone()),
            OutOfStockState::Risolto => {
                return Err(
                    AppError::new(ErrorCode::RecordTerminal).with_detail("order_id", order_id)
                );
            }
            _ => {}
        }

        for item in &record.affected_items {
            if let Err(e) = self
                .inventory
                .restore(&item.product_id, item.quantity_reserved)
                .await
            {
                tracing::error!(
                    order_id = %order_id,
                    product_id = %item.product_id,
                    quantity = item.quantity_reserved,
                    error = %e,
                    "Inventory restore failed; transition proceeds, reconcile manually"
                );
                crate::audit_log!(
                    operator,
                    "esaurito_inventory_restore_failed",
                    format!("product:{}", item.product_id),
                    format!("order:{} qty:{}", order_id, item.quantity_reserved)
                );
            }
        }

        let mut order = self.orders.get(order_id).await?;
        order.note = Some(append_management_note(
            order.note.as_deref(),
            &format!("annullato da {}", operator),
        ));
        order.void();
        self.orders.update(order.clone()).await?;

        let now = chrono::Utc::now().timestamp_millis();
        record.state = OutOfStockState::Annullato;
        record.resolved_by = Some(operator.to_string());
        record.updated_at = now;

        let payload = EsauritoCancelledPayload {
            order_id: order.id.clone(),
            order_number: order.order_number.clone(),
            table_number: record.table_number.clone(),
            cancelled_by: operator.to_string(),
            timestamp: now,
        };
        let _ = self.hub.emit(
            kinds::ORDER_ESAURITO_CANCELLED,
            serde_json::to_value(&payload)?,
            EmitOptions {
                priority: EventPriority::High,
                acknowledgment_required: true,
                entity_changes: Some(vec![EntityChange {
                    entity_type: "order".into(),
                    entity_id: order.id.clone(),
                    operation: EntityOperation::Update,
                    version: now as u64,
                    previous_version: None,
                }]),
                ..Default::default()
            },
        )?;

        crate::audit_log!(
            operator,
            "esaurito_resolve_cancel",
            format!("order:{}", order_id),
            format!("order #{} voided", order.order_number)
        );
        tracing::info!(order_id = %order_id, operator = %operator, "Out-of-stock record cancelled");
        Ok(record.clone())
    }
}
