//! Storage seams for the out-of-stock workflow
//!
//! Databases are an external collaborator; the workflow talks to these
//! traits. The in-memory implementations are the reference stores and the
//! test vehicle.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use shared::error::{AppError, AppResult, ErrorCode};
use shared::order::Order;

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, order_id: &str) -> AppResult<Order>;
    async fn insert(&self, order: Order) -> AppResult<()>;
    async fn update(&self, order: Order) -> AppResult<()>;
    /// Next progressive order number
    async fn next_order_number(&self) -> AppResult<String>;
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Add `quantity` units of the product back to stock
    async fn restore(&self, product_id: &str, quantity: i32) -> AppResult<()>;
    async fn available(&self, product_id: &str) -> AppResult<i32>;
}

// ==================== In-memory implementations ====================

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<String, Order>>,
    counter: AtomicU64,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the number sequence (tests, imports)
    pub fn with_counter_start(start: u64) -> Self {
        let store = Self::default();
        store.counter.store(start, Ordering::SeqCst);
        store
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get(&self, order_id: &str) -> AppResult<Order> {
        self.orders
            .lock()
            .get(order_id)
            .cloned()
            .ok_or_else(|| AppError::new(ErrorCode::OrderNotFound).with_detail("order_id", order_id))
    }

    async fn insert(&self, order: Order) -> AppResult<()> {
        let mut orders = self.orders.lock();
        if orders.contains_key(&order.id) {
            return Err(AppError::new(ErrorCode::AlreadyExists).with_detail("order_id", order.id));
        }
        orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn update(&self, order: Order) -> AppResult<()> {
        let mut orders = self.orders.lock();
        if !orders.contains_key(&order.id) {
            return Err(
                AppError::new(ErrorCode::OrderNotFound).with_detail("order_id", order.id)
            );
        }
        orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn next_order_number(&self) -> AppResult<String> {
        Ok(format!("{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

#[derive(Default)]
pub struct InMemoryInventoryStore {
    stock: Mutex<HashMap<String, i32>>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stock(&self, product_id: impl Into<String>, quantity: i32) {
        self.stock.lock().insert(product_id.into(), quantity);
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn restore(&self, product_id: &str, quantity: i32) -> AppResult<()> {
        let mut stock = self.stock.lock();
        *stock.entry(product_id.to_string()).or_insert(0) += quantity;
        Ok(())
    }

    async fn available(&self, product_id: &str) -> AppResult<i32> {
        Ok(self.stock.lock().get(product_id).copied().unwrap_or(0))
    }
}
