//! Data type to processor mapping.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use ibhist_model::DataType;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::processor::{
    BarProcessor, BidAskProcessor, MidpointProcessor, PassThroughProcessor, TradesProcessor,
};

static GLOBAL: Lazy<Arc<ProcessorRegistry>> =
    Lazy::new(|| Arc::new(ProcessorRegistry::with_defaults()));

/// Maps each data type to the processor that shapes its bars.
///
/// Registration is last-wins. Lookups clone the `Arc` out of the map, so a
/// registration racing with an in-flight request never changes the shape of
/// that request's rows.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: RwLock<HashMap<DataType, Arc<dyn BarProcessor>>>,
}

impl ProcessorRegistry {
    /// Empty registry: every lookup falls back to pass-through.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in TRADES, BID_ASK and MIDPOINT processors.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(DataType::Trades, Arc::new(TradesProcessor));
        registry.register(DataType::BidAsk, Arc::new(BidAskProcessor));
        registry.register(DataType::Midpoint, Arc::new(MidpointProcessor));
        registry
    }

    /// Process-wide registry used by clients that don't bring their own.
    pub fn global() -> Arc<ProcessorRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Returns the processor previously registered for `data_type`, if any.
    pub fn register(
        &self,
        data_type: DataType,
        processor: Arc<dyn BarProcessor>,
    ) -> Option<Arc<dyn BarProcessor>> {
        debug!(data_type = %data_type, processor = processor.name(), "registering processor");
        self.processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(data_type, processor)
    }

    pub fn get(&self, data_type: DataType) -> Arc<dyn BarProcessor> {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&data_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(PassThroughProcessor::new(data_type)) as Arc<dyn BarProcessor>)
    }

    pub fn contains(&self, data_type: DataType) -> bool {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&data_type)
    }

    /// Registered data types in wire order.
    pub fn registered(&self) -> Vec<DataType> {
        let processors = self.processors.read().unwrap_or_else(PoisonError::into_inner);
        DataType::ALL
            .into_iter()
            .filter(|dt| processors.contains_key(dt))
            .collect()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("registered", &self.registered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Row;
    use ibhist_model::Bar;

    struct Fixed(&'static str);

    impl BarProcessor for Fixed {
        fn data_type(&self) -> DataType {
            DataType::Trades
        }
        fn columns(&self) -> Vec<String> {
            vec!["tag".to_string()]
        }
        fn process(&self, bars: &[Bar]) -> Vec<Row> {
            bars.iter().map(|_| Row::new().with("tag", self.0)).collect()
        }
    }

    #[test]
    fn test_defaults() {
        let registry = ProcessorRegistry::with_defaults();
        assert_eq!(
            registry.registered(),
            vec![DataType::Trades, DataType::Midpoint, DataType::BidAsk]
        );
        assert_eq!(registry.get(DataType::BidAsk).data_type(), DataType::BidAsk);
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = ProcessorRegistry::with_defaults();
        assert!(registry.register(DataType::Trades, Arc::new(Fixed("a"))).is_some());
        let previous = registry.register(DataType::Trades, Arc::new(Fixed("b")));
        assert_eq!(previous.unwrap().columns(), vec!["tag"]);

        let bar = Bar::new("20240119 09:30:00", 1.0, 1.0, 1.0, 1.0, 1);
        let rows = registry.get(DataType::Trades).process(&[bar]);
        assert_eq!(rows[0].get("tag").unwrap().to_string(), "b");
    }

    #[test]
    fn test_unregistered_type_falls_back_to_pass_through() {
        let registry = ProcessorRegistry::new();
        assert!(!registry.contains(DataType::Ask));
        let processor = registry.get(DataType::Ask);
        assert_eq!(processor.data_type(), DataType::Ask);
        assert_eq!(processor.columns().len(), 8);
    }

    #[test]
    fn test_lookup_snapshots_processor() {
        let registry = ProcessorRegistry::new();
        registry.register(DataType::Trades, Arc::new(Fixed("before")));
        let held = registry.get(DataType::Trades);
        registry.register(DataType::Trades, Arc::new(Fixed("after")));

        let bar = Bar::new("20240119 09:30:00", 1.0, 1.0, 1.0, 1.0, 1);
        let rows = held.process(&[bar]);
        assert_eq!(rows[0].get("tag").unwrap().to_string(), "before");
    }
}
