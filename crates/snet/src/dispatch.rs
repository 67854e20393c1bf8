//! Dispatch Facade
//!
//! Entry point for a raw device reading: conversion, then the transform
//! stage when conversion succeeded, then republication through the plugin
//! host when the address declares publish parameters and the result is good.
//! Nothing here returns an error to the caller; failures are logged and a
//! panic anywhere in the pipeline yields `None`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, error, warn};

use snet_mq::{Payload, PluginHost};
use snet_types::{AddressDetails, AddressValue, Value, convert};

use crate::transform::{TransformStage, panic_message};
use crate::virtual_address::{VirtualEngine, VirtualResult};

/// Ties conversion, transforms, virtual addresses and publication together
pub struct Dispatcher {
    transforms: Arc<TransformStage>,
    engine: Arc<VirtualEngine>,
    host: Option<Arc<PluginHost>>,
}

impl Dispatcher {
    pub fn new(transforms: Arc<TransformStage>, engine: Arc<VirtualEngine>) -> Self {
        Self {
            transforms,
            engine,
            host: None,
        }
    }

    /// Publish good values through `host`
    pub fn with_host(mut self, host: Arc<PluginHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn engine(&self) -> &Arc<VirtualEngine> {
        &self.engine
    }

    pub fn transforms(&self) -> &Arc<TransformStage> {
        &self.transforms
    }

    /// Convert and transform a reading without publishing it
    pub fn process(&self, details: &AddressDetails, raw: &Value) -> Option<AddressValue> {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let converted = convert(details.data_type, raw);
            if !converted.is_ok() {
                debug!(
                    address = %details.name,
                    quality = ?converted.quality,
                    "Conversion failed: {}",
                    converted.message
                );
                return AddressValue::new(
                    &details.name,
                    Value::Null,
                    Value::Null,
                    converted.quality,
                    converted.message,
                );
            }

            let transformed = self.transforms.apply(
                details.parse.as_ref(),
                &details.name,
                converted.value.clone(),
            );
            AddressValue::new(
                &details.name,
                transformed.value,
                converted.value,
                transformed.quality,
                transformed.message,
            )
        }));

        match outcome {
            Ok(value) => Some(value),
            Err(panic) => {
                error!(
                    address = %details.name,
                    "Evaluation panicked: {}",
                    panic_message(panic.as_ref())
                );
                None
            }
        }
    }

    /// Evaluate a reading and publish it when configured
    pub async fn evaluate(&self, details: &AddressDetails, raw: &Value) -> Option<AddressValue> {
        let value = self.process(details, raw)?;
        if value.is_good() {
            self.publish(details, &value).await;
        }
        Some(value)
    }

    async fn publish(&self, details: &AddressDetails, value: &AddressValue) {
        let (Some(host), Some(publish)) = (&self.host, &details.publish) else {
            return;
        };
        let content = publish.format_content(&value.result);
        if let Err(e) = host
            .produce(publish.topic.as_str(), Payload::Text(content), publish.targets.clone())
            .await
        {
            warn!(address = %details.name, topic = %publish.topic, "Publish failed: {}", e);
        }
    }

    /// Evaluate the current value of a virtual address, registering it first
    pub async fn read_virtual(&self, details: &AddressDetails) -> Option<AddressValue> {
        if let Err(e) = self.engine.register(details).await {
            warn!(address = %details.name, "Virtual address rejected: {}", e);
            return None;
        }
        let current = match self.engine.read(&details.name) {
            Ok(value) => value,
            Err(e) => {
                warn!(address = %details.name, "Virtual read failed: {}", e);
                return None;
            }
        };
        self.evaluate(details, &current).await
    }

    /// Write a virtual address, registering it first
    pub async fn write_virtual(&self, details: &AddressDetails, value: &Value) -> VirtualResult<Value> {
        self.engine.register(details).await?;
        self.engine.write(&details.name, value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use snet_mq::{HostEvent, HostOptions, StaticModuleLoader, builtin, instance_key};
    use snet_types::{DataType, ParseParams, PublishParams, Quality, ScalarType};
    use std::time::Duration;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(TransformStage::default()), Arc::new(VirtualEngine::new()))
    }

    fn int32(name: &str) -> AddressDetails {
        AddressDetails::new(name, DataType::Scalar(ScalarType::Int32))
    }

    #[test]
    fn test_conversion_outcomes() {
        let dispatch = dispatcher();

        let ok = dispatch.process(&int32("Pump.Speed"), &Value::from("1450")).unwrap();
        assert_eq!(ok.result, Value::Int32(1450));
        assert_eq!(ok.original, Value::Int32(1450));
        assert_eq!(ok.quality, Quality::Normal);

        let bad = dispatch.process(&int32("Pump.Speed"), &Value::from("abc")).unwrap();
        assert_eq!(bad.quality, Quality::TypeError);
        assert_eq!(bad.result, Value::Null);
        assert!(bad.message.contains("abc"));

        let empty = dispatch.process(&int32("Pump.Speed"), &Value::from("  ")).unwrap();
        assert_eq!(empty.quality, Quality::Abnormal);
    }

    #[test]
    fn test_transform_keeps_original() {
        let dispatch = dispatcher();
        let details = int32("Tank.Level").with_parse(ParseParams::Method {
            handle: "linear:0.1".into(),
            method: "scale".into(),
        });

        let value = dispatch.process(&details, &Value::from("250")).unwrap();
        assert_eq!(value.original, Value::Int32(250));
        assert_eq!(value.result, Value::Double(25.0));
        assert_eq!(value.quality, Quality::ParsedUnverified);

        // A failed conversion never reaches the transform
        let bad = dispatch.process(&details, &Value::from("x")).unwrap();
        assert_eq!(bad.quality, Quality::TypeError);
    }

    #[tokio::test]
    async fn test_good_values_are_published() {
        let dir = tempfile::tempdir().unwrap();
        let options = HostOptions::new(dir.path().join("lib"), dir.path().join("cfg"))
            .with_watch(false)
            .with_workers(2);
        let host = PluginHost::new(options, StaticModuleLoader::with_builtin());
        for export in builtin::register() {
            host.register_type(builtin::MODULE_ID, export);
        }
        host.create_instance(builtin::MEMORY_BACKEND, "m1", serde_json::json!({}))
            .await
            .unwrap();
        let key = instance_key(builtin::MEMORY_BACKEND, "m1");
        assert!(host.consume(&key, "plant/level").await.unwrap().success);

        let mut events = host.subscribe();
        let dispatch = dispatcher().with_host(Arc::clone(&host));
        let details = int32("Tank.Level")
            .with_publish(PublishParams::new("plant/level").with_format(r#"{"level":{0}}"#));

        let bad = dispatch.evaluate(&details, &Value::from("n/a")).await.unwrap();
        assert_eq!(bad.quality, Quality::TypeError);
        let good = dispatch.evaluate(&details, &Value::from("75")).await.unwrap();
        assert_eq!(good.quality, Quality::Normal);

        let payload = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(HostEvent::Received { payload, .. }) = events.recv().await {
                    return payload;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(payload, Payload::Text(r#"{"level":75}"#.into()));

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_virtual_read_write() {
        let dispatch = dispatcher();
        let details =
            AddressDetails::virtual_address("Setpoint", DataType::Scalar(ScalarType::Double));

        let before = dispatch.read_virtual(&details).await.unwrap();
        assert_eq!(before.quality, Quality::Abnormal);

        dispatch.write_virtual(&details, &Value::from("12.5")).await.unwrap();
        let after = dispatch.read_virtual(&details).await.unwrap();
        assert_eq!(after.result, Value::Double(12.5));
        assert_eq!(after.quality, Quality::Normal);

        let array = AddressDetails::virtual_address("Bad{100}", DataType::Array(ScalarType::Int32));
        assert!(dispatch.read_virtual(&array).await.is_none());
    }
}
