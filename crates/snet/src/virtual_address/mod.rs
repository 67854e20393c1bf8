//! Virtual Address Engine
//!
//! Synthesizes values for addresses that have no physical backing. Each
//! registered address owns a cell holding its current value plus, unless it
//! is `Static`, a scheduler loop that replaces the value on every tick.
//!
//! Cells are keyed by the address name without its directive, so
//! registering `Saw{100,1,0^10}` after `Saw{500}` redefines the same
//! address: the old loop is cancelled and awaited before the new one starts.

mod directive;
mod generator;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use snet_types::{AddressDetails, ConvertError, DataType, Value, try_convert};

pub use directive::{Directive, Mode, base_name};
pub use generator::Generator;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, thiserror::Error)]
pub enum VirtualError {
    #[error("Invalid directive in '{name}': {reason}")]
    Directive { name: String, reason: String },

    #[error("Unsupported virtual address '{name}': {reason}")]
    Unsupported { name: String, reason: String },

    #[error("Virtual address not registered: {0}")]
    UnknownAddress(String),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error("Virtual address engine has been disposed")]
    Disposed,
}

pub type VirtualResult<T> = Result<T, VirtualError>;

// ─────────────────────────────────────────────────────────────────────────────
// Definition
// ─────────────────────────────────────────────────────────────────────────────

/// Declared type plus parsed directive; a change in either replaces the cell
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub data_type: DataType,
    pub directive: Directive,
}

impl Definition {
    /// Parse and validate an address for the engine
    pub fn from_details(details: &AddressDetails) -> VirtualResult<Self> {
        let directive = Directive::parse(&details.name)?;
        let unsupported = |reason: String| VirtualError::Unsupported {
            name: details.name.clone(),
            reason,
        };

        match details.data_type {
            DataType::Array(_) => {
                return Err(unsupported("array types cannot be virtual".into()));
            }
            DataType::None if directive.mode != Mode::Static => {
                return Err(unsupported(format!(
                    "{} needs a declared type",
                    directive.mode.name()
                )));
            }
            DataType::None => {}
            DataType::Scalar(scalar) => {
                Generator::validate(scalar, &directive.mode).map_err(unsupported)?;
            }
        }

        Ok(Self {
            data_type: details.data_type,
            directive,
        })
    }

    pub fn key(&self) -> &str {
        &self.directive.base
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cell
// ─────────────────────────────────────────────────────────────────────────────

/// State of one virtual address
pub struct VirtualCell {
    definition: Definition,
    value: RwLock<Value>,
    generator: Option<Mutex<Generator>>,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl VirtualCell {
    fn start(definition: Definition, token: CancellationToken) -> Arc<Self> {
        let generator = match (definition.data_type.scalar(), definition.directive.interval) {
            (Some(scalar), Some(_)) => Some(Mutex::new(Generator::new(
                scalar,
                definition.directive.mode,
            ))),
            _ => None,
        };
        let interval = definition.directive.interval;

        let cell = Arc::new(Self {
            definition,
            value: RwLock::new(Value::Null),
            generator,
            token,
            task: Mutex::new(None),
        });

        if let (Some(interval), Some(_)) = (interval, &cell.generator) {
            let handle = tokio::spawn(run_cell(Arc::clone(&cell), interval));
            *cell.task.lock() = Some(handle);
        }
        cell
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    /// Last generated or written value
    pub fn value(&self) -> Value {
        self.value.read().clone()
    }

    /// Generate the next value; `Static` cells keep their value
    pub fn tick(&self) -> Value {
        let Some(generator) = &self.generator else {
            return self.value();
        };
        let mut generator = generator.lock();
        let next = generator.next(&self.value.read());
        *self.value.write() = next.clone();
        next
    }

    fn set(&self, value: Value) {
        *self.value.write() = value;
    }

    /// Cancel the scheduler loop and wait for it to exit
    async fn stop(&self) {
        self.token.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

async fn run_cell(cell: Arc<VirtualCell>, interval: Duration) {
    let name = cell.definition.key().to_string();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(address = %name, ?interval, "Virtual address loop started");

    loop {
        tokio::select! {
            biased;
            _ = cell.token.cancelled() => break,
            _ = ticker.tick() => {
                let value = cell.tick();
                trace!(address = %name, %value, "Virtual address ticked");
            }
        }
    }

    debug!(address = %name, "Virtual address loop stopped");
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Owns every virtual address cell and its scheduler
pub struct VirtualEngine {
    cells: DashMap<String, Arc<VirtualCell>>,
    token: CancellationToken,
}

impl Default for VirtualEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualEngine {
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
            token: CancellationToken::new(),
        }
    }

    /// Register an address, replacing a previous definition that differs
    ///
    /// Returns `true` when a new cell was created, `false` when an identical
    /// definition was already registered.
    pub async fn register(&self, details: &AddressDetails) -> VirtualResult<bool> {
        let definition = Definition::from_details(details)?;
        let key = definition.key().to_string();

        loop {
            if self.token.is_cancelled() {
                return Err(VirtualError::Disposed);
            }

            let existing = self.cells.get(&key).map(|cell| Arc::clone(cell.value()));
            if let Some(existing) = existing {
                if existing.definition == definition {
                    return Ok(false);
                }
                let removed = self
                    .cells
                    .remove_if(&key, |_, cell| Arc::ptr_eq(cell, &existing))
                    .is_some();
                if removed {
                    existing.stop().await;
                    info!(
                        address = %key,
                        from = existing.definition.directive.mode.name(),
                        to = definition.directive.mode.name(),
                        "Virtual address redefined"
                    );
                }
                continue;
            }

            match self.cells.entry(key.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let mode = definition.directive.mode.name();
                    let data_type = definition.data_type;
                    slot.insert(VirtualCell::start(definition, self.token.child_token()));
                    info!(address = %key, mode, %data_type, "Virtual address registered");
                    return Ok(true);
                }
            }
        }
    }

    /// Stop and remove an address
    pub async fn unregister(&self, name: &str) -> bool {
        match self.cells.remove(base_name(name)) {
            Some((key, cell)) => {
                cell.stop().await;
                debug!(address = %key, "Virtual address unregistered");
                true
            }
            None => false,
        }
    }

    /// Current value; `Null` before the first tick
    pub fn read(&self, name: &str) -> VirtualResult<Value> {
        self.cell(name).map(|cell| cell.value())
    }

    /// Set the value directly after converting it to the declared type
    pub fn write(&self, name: &str, value: &Value) -> VirtualResult<Value> {
        let cell = self.cell(name)?;
        let converted = try_convert(cell.definition.data_type, value)?;
        cell.set(converted.clone());
        debug!(address = %cell.definition.key(), value = %converted, "Virtual address written");
        Ok(converted)
    }

    /// Generate the next value now, outside the schedule
    pub fn advance(&self, name: &str) -> VirtualResult<Value> {
        self.cell(name).map(|cell| cell.tick())
    }

    pub fn cell(&self, name: &str) -> VirtualResult<Arc<VirtualCell>> {
        self.cells
            .get(base_name(name))
            .map(|cell| Arc::clone(cell.value()))
            .ok_or_else(|| VirtualError::UnknownAddress(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cells.contains_key(base_name(name))
    }

    /// Registered address names, sorted
    pub fn addresses(&self) -> Vec<String> {
        let mut names: Vec<_> = self.cells.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Stop every loop and drop every cell; later registrations fail
    pub async fn dispose(&self) {
        self.token.cancel();
        let keys: Vec<String> = self.cells.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, cell)) = self.cells.remove(&key) {
                cell.stop().await;
            }
        }
        info!("Virtual address engine disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for VirtualEngine {
    fn drop(&mut self) {
        // Cell loops hold child tokens; they exit on their next poll
        self.token.cancel();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use snet_types::ScalarType;

    fn int32(name: &str) -> AddressDetails {
        AddressDetails::virtual_address(name, DataType::Scalar(ScalarType::Int32))
    }

    #[tokio::test(start_paused = true)]
    async fn test_range_wrap_sequence() {
        let engine = VirtualEngine::new();
        assert!(engine.register(&int32("Saw{1000,3,0^10}")).await.unwrap());
        assert_eq!(engine.read("Saw").unwrap(), Value::Null);

        let values: Vec<_> = (0..6).map(|_| engine.advance("Saw").unwrap()).collect();
        let expected: Vec<_> = [0, 3, 6, 9, 0, 3].into_iter().map(Value::Int32).collect();
        assert_eq!(values, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degenerate_range_is_fixed_point() {
        let engine = VirtualEngine::new();
        engine.register(&int32("Five{10,5^5}")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(105)).await;
        assert_eq!(engine.read("Five").unwrap(), Value::Int32(5));
        for _ in 0..10 {
            assert_eq!(engine.advance("Five").unwrap(), Value::Int32(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ticks_on_interval() {
        let engine = VirtualEngine::new();
        engine.register(&int32("Count{100,1}")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.read("Count").unwrap(), Value::Null);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.read("Count").unwrap(), Value::Int32(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_redefinition_stops_old_generator() {
        let engine = VirtualEngine::new();
        engine.register(&int32("Count{100,1}")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;

        let old = engine.cell("Count").unwrap();
        assert_eq!(old.value(), Value::Int32(2));

        // Same definition is a no-op
        assert!(!engine.register(&int32("Count{100,1}")).await.unwrap());
        assert!(Arc::ptr_eq(&old, &engine.cell("Count").unwrap()));

        let redefined = AddressDetails::virtual_address(
            "Count{100,1}",
            DataType::Scalar(ScalarType::Double),
        );
        assert!(engine.register(&redefined).await.unwrap());
        assert!(!old.is_running());

        let fresh = engine.cell("Count").unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert_eq!(fresh.value(), Value::Null);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(old.value(), Value::Int32(2));
        assert_eq!(fresh.value(), Value::Double(1.0));
    }

    #[tokio::test]
    async fn test_static_write_and_read() {
        let engine = VirtualEngine::new();
        engine.register(&int32("Setpoint")).await.unwrap();

        assert_eq!(engine.read("Setpoint").unwrap(), Value::Null);
        assert_eq!(
            engine.write("Setpoint", &Value::from("42")).unwrap(),
            Value::Int32(42)
        );
        assert_eq!(engine.read("Setpoint").unwrap(), Value::Int32(42));
        assert_eq!(engine.advance("Setpoint").unwrap(), Value::Int32(42));

        assert!(matches!(
            engine.write("Setpoint", &Value::from("abc")),
            Err(VirtualError::Convert(_))
        ));
        assert!(matches!(
            engine.read("Missing"),
            Err(VirtualError::UnknownAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_unsupported_definitions() {
        let engine = VirtualEngine::new();
        let array = AddressDetails::virtual_address(
            "Samples{100}",
            DataType::Array(ScalarType::Double),
        );
        assert!(matches!(
            engine.register(&array).await,
            Err(VirtualError::Unsupported { .. })
        ));

        let untyped = AddressDetails::virtual_address("Noise{100}", DataType::None);
        assert!(engine.register(&untyped).await.is_err());

        let text_step = AddressDetails::virtual_address(
            "Label{100,1}",
            DataType::Scalar(ScalarType::String),
        );
        assert!(engine.register(&text_step).await.is_err());

        assert!(engine.register(&int32("Ramp{100,0.5}")).await.is_err());
        assert!(engine.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_stops_everything() {
        let engine = VirtualEngine::new();
        engine.register(&int32("A{100}")).await.unwrap();
        engine.register(&int32("B{100,1}")).await.unwrap();
        let a = engine.cell("A").unwrap();
        assert_eq!(engine.addresses(), vec!["A".to_string(), "B".to_string()]);

        engine.dispose().await;
        assert!(engine.is_empty());
        assert!(!a.is_running());
        assert!(matches!(
            engine.register(&int32("C{100}")).await,
            Err(VirtualError::Disposed)
        ));

        // Idempotent
        engine.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_engine_stops_loops() {
        let engine = VirtualEngine::new();
        engine.register(&int32("Count{100,1}")).await.unwrap();
        let cell = engine.cell("Count").unwrap();

        drop(engine);
        tokio::time::sleep(Duration::from_millis(550)).await;

        assert!(!cell.is_running());
        assert_eq!(cell.value(), Value::Null);
    }

    #[tokio::test]
    async fn test_rejects_float_range_too_wide_to_sample() {
        let engine = VirtualEngine::new();
        let wide = AddressDetails::virtual_address(
            "Wide{100,-1e308^1e308}",
            DataType::Scalar(ScalarType::Double),
        );
        assert!(matches!(
            engine.register(&wide).await,
            Err(VirtualError::Unsupported { .. })
        ));
        assert!(engine.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister() {
        let engine = VirtualEngine::new();
        engine.register(&int32("Tmp{100}")).await.unwrap();
        let cell = engine.cell("Tmp{100}").unwrap();
        assert!(engine.unregister("Tmp").await);
        assert!(!cell.is_running());
        assert!(!engine.unregister("Tmp").await);
    }
}
